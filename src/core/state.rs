//! Lock file management — load, save (atomic), path derivation.

use super::types::{ResourceLock, StateLock, TemplateRecord};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Derive the lock file path for a stack within the state directory.
pub fn lock_file_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("state.lock.yaml")
}

/// Load a lock file for a stack. Returns None if the file doesn't exist.
pub fn load_lock(state_dir: &Path, stack: &str) -> Result<Option<StateLock>, String> {
    let path = lock_file_path(state_dir, stack);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let lock: StateLock = serde_yaml_ng::from_str(&content)
        .map_err(|e| format!("invalid lock file {}: {}", path.display(), e))?;
    Ok(Some(lock))
}

/// Save a lock file atomically (write to temp, then rename).
pub fn save_lock(state_dir: &Path, lock: &StateLock) -> Result<(), String> {
    let path = lock_file_path(state_dir, &lock.stack);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create dir {}: {}", parent.display(), e))?;
    }

    let yaml = serde_yaml_ng::to_string(lock).map_err(|e| format!("serialize error: {}", e))?;

    let tmp_path = path.with_extension("lock.yaml.tmp");
    std::fs::write(&tmp_path, &yaml)
        .map_err(|e| format!("cannot write {}: {}", tmp_path.display(), e))?;
    std::fs::rename(&tmp_path, &path).map_err(|e| {
        format!(
            "cannot rename {} → {}: {}",
            tmp_path.display(),
            path.display(),
            e
        )
    })?;

    Ok(())
}

/// Create a lock for a stack from freshly synthesized resource hashes.
pub fn new_lock(
    stack: &str,
    template: Option<TemplateRecord>,
    resources: IndexMap<String, ResourceLock>,
) -> StateLock {
    use crate::tripwire::eventlog::now_iso8601;
    StateLock {
        schema: "1.0".to_string(),
        stack: stack.to_string(),
        generated_at: now_iso8601(),
        generator: format!("stackforge {}", env!("CARGO_PKG_VERSION")),
        template,
        resources,
    }
}

/// Stack names that have a lock under `state_dir`, sorted.
pub fn list_stacks(state_dir: &Path) -> Result<Vec<String>, String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;
    let mut stacks: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|name| lock_file_path(state_dir, name).exists())
        .collect();
    stacks.sort();
    Ok(stacks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TemplateFormat;

    fn make_lock() -> StateLock {
        let mut resources = IndexMap::new();
        resources.insert(
            "VpcABCDEF01".to_string(),
            ResourceLock {
                resource_type: "AWS::EC2::VPC".to_string(),
                hash: "blake3:abc123".to_string(),
            },
        );
        StateLock {
            schema: "1.0".to_string(),
            stack: "Demo".to_string(),
            generated_at: "2026-02-16T14:00:00Z".to_string(),
            generator: "stackforge 0.3.0".to_string(),
            template: Some(TemplateRecord {
                path: "cdk.out/Demo.template.json".to_string(),
                format: TemplateFormat::Json,
                hash: "blake3:fff".to_string(),
            }),
            resources,
        }
    }

    #[test]
    fn test_lock_file_path() {
        let p = lock_file_path(Path::new("/state"), "Demo");
        assert_eq!(p, PathBuf::from("/state/Demo/state.lock.yaml"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();

        let loaded = load_lock(dir.path(), "Demo").unwrap().unwrap();
        assert_eq!(loaded.stack, "Demo");
        assert_eq!(loaded.resources.len(), 1);
        assert_eq!(loaded.resources["VpcABCDEF01"].resource_type, "AWS::EC2::VPC");
        assert_eq!(loaded.template.unwrap().format, TemplateFormat::Json);
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_lock(dir.path(), "ghost").unwrap().is_none());
    }

    #[test]
    fn test_load_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = lock_file_path(dir.path(), "bad");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "resources: [not a map").unwrap();
        let err = load_lock(dir.path(), "bad").unwrap_err();
        assert!(err.contains("invalid lock file"));
    }

    #[test]
    fn test_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();
        let tmp = dir.path().join("Demo").join("state.lock.yaml.tmp");
        assert!(!tmp.exists());
        assert!(lock_file_path(dir.path(), "Demo").exists());
    }

    #[test]
    fn test_new_lock() {
        let lock = new_lock("Demo", None, IndexMap::new());
        assert_eq!(lock.stack, "Demo");
        assert!(lock.generated_at.contains('T'));
        assert!(lock.generator.starts_with("stackforge "));
        assert!(lock.resources.is_empty());
    }

    #[test]
    fn test_roundtrip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut lock = make_lock();
        lock.resources.insert(
            "AaaFirst".to_string(),
            ResourceLock {
                resource_type: "AWS::IAM::Role".to_string(),
                hash: "blake3:xxx".to_string(),
            },
        );
        save_lock(dir.path(), &lock).unwrap();
        let loaded = load_lock(dir.path(), "Demo").unwrap().unwrap();
        let keys: Vec<_> = loaded.resources.keys().collect();
        assert_eq!(keys, vec!["VpcABCDEF01", "AaaFirst"]);
    }

    #[test]
    fn test_list_stacks() {
        let dir = tempfile::tempdir().unwrap();
        save_lock(dir.path(), &make_lock()).unwrap();
        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        std::fs::write(dir.path().join("stray-file"), "x").unwrap();
        assert_eq!(list_stacks(dir.path()).unwrap(), vec!["Demo"]);
    }
}
