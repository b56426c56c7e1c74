//! Data models for the topic list.

use serde::de::Error as _;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::store::{Document, Fields};

pub const TITLE_FIELD: &str = "title";
pub const TEXT_FIELD: &str = "text";
pub const CREATED_AT_FIELD: &str = "createdAt";

// ============================================================================
// Topic
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    /// Store-assigned id; not part of the persisted fields.
    pub id: String,
    pub title: String,
    pub text: String,
    /// Milliseconds since the epoch.
    pub created_at: i64,
}

/// Persisted shape. Older records carry `ts`; migrated ones may carry both.
#[derive(Deserialize)]
struct StoredTopic {
    #[serde(default)]
    title: String,
    #[serde(default)]
    text: String,
    #[serde(rename = "createdAt", default)]
    created_at: Option<i64>,
    #[serde(default)]
    ts: Option<i64>,
}

impl Topic {
    /// `createdAt` wins over `ts` when a record has both.
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        let stored: StoredTopic = serde_json::from_value(Value::Object(doc.fields))?;
        let created_at = stored
            .created_at
            .or(stored.ts)
            .ok_or_else(|| serde_json::Error::missing_field(CREATED_AT_FIELD))?;
        Ok(Topic {
            id: doc.id,
            title: stored.title,
            text: stored.text,
            created_at,
        })
    }
}

/// Field map for a topic about to be inserted; the store assigns the id.
pub fn new_topic_fields(title: &str, text: &str, created_at: i64) -> Fields {
    let mut fields = Fields::new();
    fields.insert(TITLE_FIELD.to_string(), Value::from(title));
    fields.insert(TEXT_FIELD.to_string(), Value::from(text));
    fields.insert(CREATED_AT_FIELD.to_string(), Value::from(created_at));
    fields
}

// ============================================================================
// Live View
// ============================================================================

/// The locally materialized topic list, newest first.
///
/// Always rebuilt from a complete snapshot, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveView {
    topics: Vec<Topic>,
}

impl LiveView {
    pub fn from_documents(docs: Vec<Document>) -> Self {
        let mut topics: Vec<Topic> = docs
            .into_iter()
            .filter_map(|doc| {
                let id = doc.id.clone();
                match Topic::from_document(doc) {
                    Ok(topic) => Some(topic),
                    Err(e) => {
                        warn!(id = %id, error = %e, "skipping malformed topic");
                        None
                    }
                }
            })
            .collect();
        // Stable: equal timestamps keep the store's order.
        topics.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self { topics }
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn first(&self) -> Option<&Topic> {
        self.topics.first()
    }
}

/// What a renderer receives after every change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub revision: u64,
    pub view: LiveView,
    /// Admin flag at publish time; controls delete affordances.
    pub admin: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Document {
        match value {
            Value::Object(fields) => Document {
                id: id.to_string(),
                fields,
            },
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_topic_from_document() {
        let topic = Topic::from_document(doc(
            "abc",
            json!({"title": "Rally", "text": "Sat 20:00", "createdAt": 1700000000000i64}),
        ))
        .unwrap();
        assert_eq!(topic.id, "abc");
        assert_eq!(topic.title, "Rally");
        assert_eq!(topic.created_at, 1_700_000_000_000);
    }

    #[test]
    fn test_topic_legacy_ts_field() {
        let topic = Topic::from_document(doc("x", json!({"title": "Old", "text": "t", "ts": 42}))).unwrap();
        assert_eq!(topic.created_at, 42);
    }

    #[test]
    fn test_topic_with_both_timestamps_prefers_created_at() {
        let topic = Topic::from_document(doc(
            "m",
            json!({"title": "Migrated", "text": "x", "createdAt": 5, "ts": 3}),
        ))
        .unwrap();
        assert_eq!(topic.created_at, 5);

        let view = LiveView::from_documents(vec![doc(
            "m",
            json!({"title": "t", "text": "x", "createdAt": 5, "ts": 5}),
        )]);
        assert_eq!(view.len(), 1);
        assert_eq!(view.first().unwrap().id, "m");
    }

    #[test]
    fn test_topic_without_timestamp_is_malformed() {
        assert!(Topic::from_document(doc("x", json!({"title": "t", "text": "x"}))).is_err());
    }

    #[test]
    fn test_topic_missing_text_defaults_empty() {
        let topic = Topic::from_document(doc("x", json!({"title": "Only title", "createdAt": 1}))).unwrap();
        assert_eq!(topic.text, "");
    }

    #[test]
    fn test_new_topic_fields() {
        let fields = new_topic_fields("T", "body", 7);
        assert_eq!(fields["title"], json!("T"));
        assert_eq!(fields["text"], json!("body"));
        assert_eq!(fields["createdAt"], json!(7));
        assert_eq!(fields.len(), 3);
    }

    #[test]
    fn test_view_sorted_newest_first() {
        let view = LiveView::from_documents(vec![
            doc("a", json!({"title": "a", "text": "", "createdAt": 1})),
            doc("c", json!({"title": "c", "text": "", "createdAt": 3})),
            doc("b", json!({"title": "b", "text": "", "createdAt": 2})),
        ]);
        let ids: Vec<&str> = view.topics().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(view.first().unwrap().id, "c");
    }

    #[test]
    fn test_view_equal_timestamps_keep_snapshot_order() {
        let view = LiveView::from_documents(vec![
            doc("y", json!({"title": "", "text": "", "createdAt": 5})),
            doc("x", json!({"title": "", "text": "", "createdAt": 5})),
        ]);
        let ids: Vec<&str> = view.topics().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "x"]);
    }

    #[test]
    fn test_view_skips_malformed() {
        let view = LiveView::from_documents(vec![
            doc("ok", json!({"title": "t", "text": "x", "createdAt": 1})),
            doc("bad", json!({"title": "t", "createdAt": "yesterday"})),
        ]);
        assert_eq!(view.len(), 1);
        assert_eq!(view.first().unwrap().id, "ok");
    }

    #[test]
    fn test_empty_view() {
        let view = LiveView::from_documents(vec![]);
        assert!(view.is_empty());
        assert!(view.first().is_none());
    }
}
