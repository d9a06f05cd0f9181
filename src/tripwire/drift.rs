//! Drift detection — compare written templates to the hashes in the lock.

use crate::core::types::StateLock;
use crate::tripwire::hasher;
use std::path::Path;

/// A single drift finding.
#[derive(Debug, Clone)]
pub struct DriftFinding {
    pub stack: String,
    pub path: String,
    pub expected_hash: String,
    pub actual_hash: String,
    pub detail: String,
}

/// Check one template file against its expected hash.
pub fn check_template_drift(stack: &str, path: &str, expected_hash: &str) -> Option<DriftFinding> {
    let file_path = Path::new(path);
    if !file_path.exists() {
        return Some(DriftFinding {
            stack: stack.to_string(),
            path: path.to_string(),
            expected_hash: expected_hash.to_string(),
            actual_hash: "MISSING".to_string(),
            detail: format!("{} does not exist", path),
        });
    }

    let actual = hasher::hash_file(file_path).unwrap_or_else(|e| format!("ERROR:{}", e));
    if actual == expected_hash {
        return None;
    }
    Some(DriftFinding {
        stack: stack.to_string(),
        path: path.to_string(),
        expected_hash: expected_hash.to_string(),
        actual_hash: actual,
        detail: format!("{} changed since synth", path),
    })
}

/// Check the template recorded in a lock. A lock without a template has
/// nothing to drift.
pub fn detect_drift(lock: &StateLock) -> Vec<DriftFinding> {
    lock.template
        .as_ref()
        .and_then(|t| check_template_drift(&lock.stack, &t.path, &t.hash))
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state;
    use crate::core::types::{TemplateFormat, TemplateRecord};
    use indexmap::IndexMap;

    fn lock_with(path: &str, hash: &str) -> StateLock {
        state::new_lock(
            "Demo",
            Some(TemplateRecord {
                path: path.to_string(),
                format: TemplateFormat::Json,
                hash: hash.to_string(),
            }),
            IndexMap::new(),
        )
    }

    #[test]
    fn test_no_drift() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Demo.template.json");
        std::fs::write(&file, "{}").unwrap();
        let hash = hasher::hash_file(&file).unwrap();
        assert!(detect_drift(&lock_with(file.to_str().unwrap(), &hash)).is_empty());
    }

    #[test]
    fn test_content_drift() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Demo.template.json");
        std::fs::write(&file, "{}").unwrap();
        let hash = hasher::hash_file(&file).unwrap();
        std::fs::write(&file, "{\"edited\": true}").unwrap();

        let findings = detect_drift(&lock_with(file.to_str().unwrap(), &hash));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].stack, "Demo");
        assert_ne!(findings[0].actual_hash, findings[0].expected_hash);
        assert!(findings[0].detail.contains("changed"));
    }

    #[test]
    fn test_missing_template() {
        let findings = detect_drift(&lock_with("/nonexistent/Demo.template.json", "blake3:abc"));
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].actual_hash, "MISSING");
    }

    #[test]
    fn test_lock_without_template() {
        let lock = state::new_lock("Demo", None, IndexMap::new());
        assert!(detect_drift(&lock).is_empty());
    }
}
