//! Typed decoding of model responses before they reach the cache
//!
//! LLM-backed modules get free text back. [`decode_response`] pulls the JSON
//! object out of it, decodes it into the module's result type and runs the
//! type's own checks, so only well-formed results are ever cached.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{Result, SentinelError};

static FENCED_JSON: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok());

/// Semantic checks run after a payload decodes
pub trait Validate {
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

impl Validate for serde_json::Value {}

/// Locate the JSON object inside a model response.
///
/// Prefers a fenced code block; otherwise takes everything from the first
/// `{` to the last `}`.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.as_ref().and_then(|re| re.captures(text)) {
        if let Some(body) = caps.get(1) {
            return Some(body.as_str());
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Decode and validate a model response.
pub fn decode_response<T: DeserializeOwned + Validate>(text: &str) -> Result<T> {
    let json = extract_json(text).ok_or_else(|| {
        SentinelError::InvalidPayload("response does not contain a JSON object".to_string())
    })?;
    let value: T = serde_json::from_str(json)?;
    value.validate()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct SupplierScore {
        score: f64,
        suppliers: Vec<String>,
    }

    impl Validate for SupplierScore {
        fn validate(&self) -> Result<()> {
            if !(0.0..=10.0).contains(&self.score) {
                return Err(SentinelError::InvalidPayload(format!(
                    "score {} outside 0-10",
                    self.score
                )));
            }
            Ok(())
        }
    }

    #[test]
    fn test_extract_fenced() {
        let text = "Here you go:\n```json\n{\"score\": 6.5, \"suppliers\": []}\n```\nThanks {not this}";
        assert_eq!(
            extract_json(text),
            Some("{\"score\": 6.5, \"suppliers\": []}")
        );
    }

    #[test]
    fn test_extract_bare() {
        assert_eq!(extract_json("result: {\"a\": {\"b\": 1}} done"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_decode_response() {
        let text = "```json\n{\"score\": 5.5, \"suppliers\": [\"Foundry Co\"]}\n```";
        let decoded: SupplierScore = decode_response(text).unwrap();
        assert_eq!(
            decoded,
            SupplierScore {
                score: 5.5,
                suppliers: vec!["Foundry Co".to_string()]
            }
        );
    }

    #[test]
    fn test_decode_errors() {
        let err = decode_response::<SupplierScore>("sorry, I cannot help").unwrap_err();
        assert!(matches!(err, SentinelError::InvalidPayload(_)));

        let err = decode_response::<SupplierScore>("{\"score\": \"high\"}").unwrap_err();
        assert!(matches!(err, SentinelError::Serialization(_)));

        let err = decode_response::<SupplierScore>("{\"score\": 42, \"suppliers\": []}").unwrap_err();
        assert!(matches!(err, SentinelError::InvalidPayload(_)));
    }
}
