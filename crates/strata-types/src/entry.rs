//! Client-facing JSON bodies for the HTTP front-end.

use serde::{Deserialize, Serialize};

/// A key-value pair as submitted by clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The key.
    #[serde(rename = "Key")]
    pub key: String,
    /// The value.
    #[serde(rename = "Value")]
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_field_names() {
        let entry = Entry {
            key: "foo".to_string(),
            value: "bar".to_string(),
        };
        let json = serde_json::to_string(&entry).expect("serialize");
        assert_eq!(json, r#"{"Key":"foo","Value":"bar"}"#);

        let parsed: Entry = serde_json::from_str(r#"{"Key":"foo","Value":"bar"}"#).expect("parse");
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_missing_field_rejected() {
        let result: Result<Entry, _> = serde_json::from_str(r#"{"Key":"foo"}"#);
        assert!(result.is_err());
    }
}
