//! Task descriptor: parsed once at ingress (bounty publish / job
//! materialization) into a typed, validated form. Storage remains opaque
//! JSON; callers downstream of validation only ever see `TaskDescriptor`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ProofworkError;

pub const MAX_DESCRIPTOR_BYTES: usize = 16 * 1024;
pub const MAX_DESCRIPTOR_DEPTH: usize = 6;
pub const SCHEMA_VERSION: &str = "v1";

pub const CAPABILITY_ALLOWLIST: &[&str] =
    &["browser", "http", "ffmpeg", "llm_summarize", "screenshot"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    Log,
    Video,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredArtifact {
    pub kind: ArtifactKind,
    pub label: Option<String>,
    pub label_prefix: Option<String>,
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSpec {
    #[serde(default)]
    pub required_artifacts: Vec<RequiredArtifact>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub schema_version: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub capability_tags: BTreeSet<String>,
    #[serde(default)]
    pub input_spec: Option<serde_json::Value>,
    #[serde(default)]
    pub output_spec: Option<OutputSpec>,
    #[serde(default)]
    pub freshness_sla_sec: Option<i64>,
    #[serde(default)]
    pub site_profile: Option<serde_json::Value>,
}

/// Validate raw JSON (size, depth, forbidden keys) and parse it into a
/// typed `TaskDescriptor`. This is the only place untrusted descriptor
/// JSON is allowed to touch `serde_json::Value` before becoming a typed
/// value that the rest of the engine passes around.
pub fn validate_and_parse(raw: &serde_json::Value) -> Result<TaskDescriptor, ProofworkError> {
    let serialized = serde_json::to_vec(raw)?;
    if serialized.len() > MAX_DESCRIPTOR_BYTES {
        return Err(ProofworkError::validation(format!(
            "task descriptor size {} exceeds {} bytes",
            serialized.len(),
            MAX_DESCRIPTOR_BYTES
        )));
    }

    let depth = json_depth(raw);
    if depth > MAX_DESCRIPTOR_DEPTH {
        return Err(ProofworkError::validation(format!(
            "task descriptor depth {depth} exceeds {MAX_DESCRIPTOR_DEPTH}"
        )));
    }

    reject_forbidden_keys(raw)?;

    let descriptor: TaskDescriptor = serde_json::from_value(raw.clone())
        .map_err(|e| ProofworkError::validation(format!("invalid task descriptor: {e}")))?;

    if descriptor.schema_version != SCHEMA_VERSION {
        return Err(ProofworkError::validation(format!(
            "unsupported schema_version {}",
            descriptor.schema_version
        )));
    }

    if descriptor.task_type.trim().is_empty() {
        return Err(ProofworkError::validation("task descriptor type cannot be empty"));
    }

    for tag in &descriptor.capability_tags {
        if !CAPABILITY_ALLOWLIST.contains(&tag.as_str()) {
            return Err(ProofworkError::validation(format!(
                "unknown capability tag '{tag}'"
            )));
        }
    }

    if let Some(sla) = descriptor.freshness_sla_sec {
        if sla < 0 {
            return Err(ProofworkError::validation("freshness_sla_sec must be non-negative"));
        }
    }

    Ok(descriptor)
}

fn json_depth(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        serde_json::Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn reject_forbidden_keys(value: &serde_json::Value) -> Result<(), ProofworkError> {
    const FORBIDDEN_SUBSTRINGS: &[&str] = &["token", "secret", "password"];

    fn walk(value: &serde_json::Value) -> Option<String> {
        match value {
            serde_json::Value::Object(map) => {
                for (key, nested) in map {
                    let lower = key.to_lowercase();
                    if FORBIDDEN_SUBSTRINGS.iter().any(|needle| lower.contains(needle)) {
                        return Some(key.clone());
                    }
                    if let Some(found) = walk(nested) {
                        return Some(found);
                    }
                }
                None
            }
            serde_json::Value::Array(items) => items.iter().find_map(walk),
            _ => None,
        }
    }

    if let Some(key) = walk(value) {
        return Err(ProofworkError::validation(format!(
            "task descriptor key '{key}' matches a forbidden pattern"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_descriptor() -> serde_json::Value {
        json!({
            "schema_version": "v1",
            "type": "screenshot_audit",
            "capability_tags": ["http", "screenshot"],
        })
    }

    #[test]
    fn accepts_minimal_valid_descriptor() {
        let descriptor = validate_and_parse(&valid_descriptor()).unwrap();
        assert_eq!(descriptor.task_type, "screenshot_audit");
        assert!(descriptor.capability_tags.contains("http"));
    }

    #[test]
    fn rejects_unknown_capability_tag() {
        let mut raw = valid_descriptor();
        raw["capability_tags"] = json!(["telekinesis"]);
        assert!(validate_and_parse(&raw).is_err());
    }

    #[test]
    fn rejects_forbidden_key_anywhere_in_tree() {
        let mut raw = valid_descriptor();
        raw["input_spec"] = json!({ "nested": { "api_secret": "x" } });
        let err = validate_and_parse(&raw).unwrap_err();
        assert!(matches!(err, ProofworkError::Validation(_)));
    }

    #[test]
    fn rejects_oversized_descriptor() {
        let mut raw = valid_descriptor();
        raw["input_spec"] = json!("x".repeat(MAX_DESCRIPTOR_BYTES + 1));
        assert!(validate_and_parse(&raw).is_err());
    }

    #[test]
    fn rejects_excessive_depth() {
        let mut nested = json!("leaf");
        for _ in 0..(MAX_DESCRIPTOR_DEPTH + 2) {
            nested = json!({ "n": nested });
        }
        let mut raw = valid_descriptor();
        raw["input_spec"] = nested;
        assert!(validate_and_parse(&raw).is_err());
    }

    #[test]
    fn rejects_wrong_schema_version() {
        let mut raw = valid_descriptor();
        raw["schema_version"] = json!("v2");
        assert!(validate_and_parse(&raw).is_err());
    }
}
