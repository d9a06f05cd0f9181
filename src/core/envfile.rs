//! `.env` loading — KEY=VALUE pairs pushed into the process environment.
//!
//! A missing file is not an error. Variables already present in the
//! environment are never overwritten.

use indexmap::IndexMap;
use std::path::Path;

/// Parse `.env` content. Supports `#` comments, blank lines, an optional
/// `export ` prefix, single/double-quoted values and trailing ` #` comments
/// on unquoted values. Lines that are not `KEY=VALUE` are skipped.
pub fn parse_env(content: &str) -> IndexMap<String, String> {
    let mut vars = IndexMap::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
            continue;
        }
        if let Some(value) = parse_value(value.trim()) {
            vars.insert(key.to_string(), value);
        }
    }

    vars
}

/// `None` for an unterminated quote.
fn parse_value(value: &str) -> Option<String> {
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            let inner = &rest[..rest.find(quote)?];
            return Some(if quote == '"' {
                inner.replace("\\n", "\n")
            } else {
                inner.to_string()
            });
        }
    }
    let unquoted = match value.find(" #") {
        Some(pos) => &value[..pos],
        None => value,
    };
    Some(unquoted.trim_end().to_string())
}

/// Read and parse an env file. Returns an empty map when the file is absent.
pub fn load_env_file(path: &Path) -> Result<IndexMap<String, String>, String> {
    if !path.exists() {
        return Ok(IndexMap::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(parse_env(&content))
}

/// Export parsed variables, skipping any already set. Returns how many were set.
pub fn apply_env(vars: &IndexMap<String, String>) -> usize {
    let mut applied = 0;
    for (key, value) in vars {
        if std::env::var_os(key).is_none() {
            std::env::set_var(key, value);
            applied += 1;
        }
    }
    applied
}

/// Load `path` into the process environment. Returns how many were set.
pub fn load_into_env(path: &Path) -> Result<usize, String> {
    let vars = load_env_file(path)?;
    Ok(apply_env(&vars))
}
