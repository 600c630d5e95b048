//! Purpose: Structured schema for non-fatal stderr notices from the CLI.
//! Exports: `Notice`, `notice_json`.
//! Role: Reports partial failures (rejected documents, empty partitions) next to a successful result.
//! Invariants: Notices are non-fatal and never alter stdout payloads.
use serde_json::{Map, Value, json};

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub resource: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    json!({
        "notice": {
            "kind": notice.kind,
            "time": notice.time,
            "cmd": notice.cmd,
            "resource": notice.resource,
            "message": notice.message,
            "details": Value::Object(notice.details.clone()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Notice, notice_json};
    use serde_json::{Map, Value};

    #[test]
    fn notice_json_has_required_fields() {
        let mut details = Map::new();
        details.insert("failed_pages".to_string(), Value::from(vec![2, 5]));

        let notice = Notice {
            kind: "partial".to_string(),
            time: "2026-02-01T00:00:00Z".to_string(),
            cmd: "partitions".to_string(),
            resource: "people".to_string(),
            message: "2 partitions failed".to_string(),
            details,
        };

        let value = notice_json(&notice);
        let obj = value
            .get("notice")
            .and_then(|v| v.as_object())
            .expect("notice object");

        assert_eq!(obj.get("kind").and_then(|v| v.as_str()), Some("partial"));
        assert_eq!(obj.get("cmd").and_then(|v| v.as_str()), Some("partitions"));
        assert_eq!(obj.get("resource").and_then(|v| v.as_str()), Some("people"));
        assert_eq!(
            obj.get("message").and_then(|v| v.as_str()),
            Some("2 partitions failed")
        );
        assert_eq!(
            value.pointer("/notice/details/failed_pages/1").and_then(|v| v.as_u64()),
            Some(5)
        );
    }
}
