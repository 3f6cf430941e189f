use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::naming::PhysicalIndex;

/// A single queued write. Immutable after construction; the pipeline only
/// moves it around and serializes it.
#[derive(Debug, Clone)]
pub enum BulkOperation {
    Insert {
        index: PhysicalIndex,
        id: String,
        source: Value,
    },
    Update {
        index: PhysicalIndex,
        id: String,
        doc: Value,
        version: Option<i64>,
    },
}

impl BulkOperation {
    pub fn insert(index: PhysicalIndex, id: impl Into<String>, source: Value) -> Self {
        Self::Insert {
            index,
            id: id.into(),
            source,
        }
    }

    pub fn update(index: PhysicalIndex, id: impl Into<String>, doc: Value) -> Self {
        Self::Update {
            index,
            id: id.into(),
            doc,
            version: None,
        }
    }

    pub fn update_versioned(
        index: PhysicalIndex,
        id: impl Into<String>,
        doc: Value,
        version: i64,
    ) -> Self {
        Self::Update {
            index,
            id: id.into(),
            doc,
            version: Some(version),
        }
    }

    pub fn index(&self) -> &PhysicalIndex {
        match self {
            Self::Insert { index, .. } | Self::Update { index, .. } => index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Insert { id, .. } | Self::Update { id, .. } => id,
        }
    }

    /// Appends the operation to a bulk body as the two NDJSON lines the
    /// endpoint expects: action metadata, then document payload.
    pub fn append_to(&self, body: &mut String) -> serde_json::Result<()> {
        match self {
            Self::Insert { index, id, source } => {
                let action = BulkAction {
                    index: Some(ActionMeta::new(index, id, None)),
                    update: None,
                };
                body.push_str(&serde_json::to_string(&action)?);
                body.push('\n');
                body.push_str(&serde_json::to_string(source)?);
                body.push('\n');
            }
            Self::Update {
                index,
                id,
                doc,
                version,
            } => {
                let action = BulkAction {
                    index: None,
                    update: Some(ActionMeta::new(index, id, *version)),
                };
                body.push_str(&serde_json::to_string(&action)?);
                body.push('\n');
                body.push_str(&serde_json::to_string(&UpdateBody { doc })?);
                body.push('\n');
            }
        }
        Ok(())
    }
}

/// Renders a whole batch as one bulk body, preserving enqueue order.
pub fn encode_bulk_body(operations: &[BulkOperation]) -> serde_json::Result<String> {
    let mut body = String::new();
    for operation in operations {
        operation.append_to(&mut body)?;
    }
    Ok(body)
}

#[derive(Debug, Serialize)]
struct BulkAction<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<ActionMeta<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    update: Option<ActionMeta<'a>>,
}

#[derive(Debug, Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<i64>,
}

impl<'a> ActionMeta<'a> {
    fn new(index: &'a PhysicalIndex, id: &'a str, version: Option<i64>) -> Self {
        Self {
            index: index.as_str(),
            id,
            version,
        }
    }
}

#[derive(Debug, Serialize)]
struct UpdateBody<'a> {
    doc: &'a Value,
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    #[serde(default)]
    pub errors: bool,
    #[serde(default)]
    pub items: Vec<BulkItem>,
}

impl BulkResponse {
    pub fn failed_items(&self) -> Vec<&BulkItemStatus> {
        self.items
            .iter()
            .filter_map(BulkItem::status)
            .filter(|item| item.is_failed())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkItem {
    index: Option<BulkItemStatus>,
    update: Option<BulkItemStatus>,
}

impl BulkItem {
    pub fn status(&self) -> Option<&BulkItemStatus> {
        self.index.as_ref().or(self.update.as_ref())
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkItemStatus {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    pub status: u16,
    #[serde(default)]
    pub error: Option<Value>,
}

impl BulkItemStatus {
    pub fn is_failed(&self) -> bool {
        self.error.is_some() || self.status >= 300
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn index(name: &str) -> PhysicalIndex {
        PhysicalIndex::from_store(name)
    }

    #[test]
    fn insert_encodes_as_action_and_source_lines() {
        let operation = BulkOperation::insert(
            index("prod_metrics"),
            "abc",
            json!({"latency": 12, "service": "gateway"}),
        );
        let mut body = String::new();
        operation.append_to(&mut body).unwrap();

        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "prod_metrics");
        assert_eq!(action["index"]["_id"], "abc");
        assert!(action["index"].get("version").is_none());
        let source: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source["latency"], 12);
    }

    #[test]
    fn versioned_update_carries_version_and_doc_wrapper() {
        let operation = BulkOperation::update_versioned(
            index("prod_register"),
            "lock-1",
            json!({"sequence": 7}),
            3,
        );
        let mut body = String::new();
        operation.append_to(&mut body).unwrap();

        let lines: Vec<&str> = body.lines().collect();
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["update"]["_index"], "prod_register");
        assert_eq!(action["update"]["version"], 3);
        let payload: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(payload["doc"]["sequence"], 7);
    }

    #[test]
    fn bulk_body_keeps_enqueue_order_and_trailing_newline() {
        let operations = vec![
            BulkOperation::insert(index("a"), "1", json!({"n": 1})),
            BulkOperation::update(index("b"), "2", json!({"n": 2})),
        ];
        let body = encode_bulk_body(&operations).unwrap();
        assert!(body.ends_with('\n'));
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].contains("\"_id\":\"1\""));
        assert!(lines[2].contains("\"update\""));
    }

    #[test]
    fn partial_failures_are_extracted_from_the_response() {
        let raw = json!({
            "took": 12,
            "errors": true,
            "items": [
                {"index": {"_index": "prod_metrics", "_id": "ok", "status": 201}},
                {"index": {"_index": "prod_metrics", "_id": "bad", "status": 400,
                           "error": {"type": "mapper_parsing_exception"}}},
                {"update": {"_index": "prod_register", "_id": "stale", "status": 409,
                            "error": {"type": "version_conflict_engine_exception"}}}
            ]
        });
        let response: BulkResponse = serde_json::from_value(raw).unwrap();
        assert!(response.errors);
        let failed = response.failed_items();
        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].id, "bad");
        assert_eq!(failed[1].status, 409);
    }

    #[test]
    fn clean_response_reports_no_failures() {
        let raw = json!({
            "took": 3,
            "errors": false,
            "items": [{"index": {"_index": "m", "_id": "1", "status": 200}}]
        });
        let response: BulkResponse = serde_json::from_value(raw).unwrap();
        assert!(response.failed_items().is_empty());
    }
}
