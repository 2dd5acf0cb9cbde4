//! Items yielded by an upstream token producer

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// One discrete item of a streamed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamItem {
    /// Text delta
    Content { text: String },

    /// Producer finished normally
    Done,

    /// Producer failed
    Error { error: ProviderError },

    /// Provider bookkeeping (usage, model info); not rendered
    Metadata { data: serde_json::Value },
}

impl StreamItem {
    pub fn content(text: impl Into<String>) -> Self {
        StreamItem::Content { text: text.into() }
    }

    pub fn error(error: ProviderError) -> Self {
        StreamItem::Error { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_from_json() {
        let item: StreamItem =
            serde_json::from_str(r#"{"type":"content","text":"hello"}"#).unwrap();
        assert_eq!(item, StreamItem::content("hello"));

        let item: StreamItem = serde_json::from_str(r#"{"type":"done"}"#).unwrap();
        assert_eq!(item, StreamItem::Done);

        let item: StreamItem =
            serde_json::from_str(r#"{"type":"error","error":{"kind":"timeout"}}"#).unwrap();
        assert_eq!(item, StreamItem::error(ProviderError::Timeout));

        let item: StreamItem =
            serde_json::from_str(r#"{"type":"metadata","data":{"tokens":12}}"#).unwrap();
        assert!(matches!(item, StreamItem::Metadata { .. }));
    }
}
