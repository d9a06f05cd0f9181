//! Stack properties — `stack.yaml` loading, CLI overrides, and validation.

use super::types::StackProps;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static STACK_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9-]*$").expect("stack name regex is valid"));

static REGION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-gov)?-[a-z]+-\d+$").expect("region regex is valid"));

static ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{12}$").expect("account regex is valid"));

/// Parse stack props from YAML.
pub fn parse_props(yaml: &str) -> Result<StackProps, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Load stack props from disk. A missing file yields the defaults.
pub fn load_props(path: &Path) -> Result<StackProps, String> {
    if !path.exists() {
        return Ok(StackProps::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_props(&content)
}

/// Command-line overrides layered on top of the props file.
#[derive(Debug, Clone, Default)]
pub struct PropsOverrides {
    pub account: Option<String>,
    pub region: Option<String>,
    pub tags: Vec<String>,
}

/// Apply overrides. Tags are `key=value`; later tags replace earlier ones.
pub fn apply_overrides(mut props: StackProps, overrides: &PropsOverrides) -> Result<StackProps, String> {
    if let Some(ref account) = overrides.account {
        props.env.account = Some(account.clone());
    }
    if let Some(ref region) = overrides.region {
        props.env.region = Some(region.clone());
    }
    for tag in &overrides.tags {
        let (key, value) = tag
            .split_once('=')
            .ok_or_else(|| format!("tag '{}' must be key=value", tag))?;
        props.tags.insert(key.to_string(), value.to_string());
    }
    Ok(props)
}

/// Validate props. Returns a list of problems (empty = valid).
pub fn validate_props(props: &StackProps) -> Vec<String> {
    let mut errors = Vec::new();

    if !STACK_NAME_RE.is_match(&props.stack_name) || props.stack_name.len() > 128 {
        errors.push(format!(
            "stack name '{}' must start with a letter, contain only letters, digits and hyphens, and be at most 128 chars",
            props.stack_name
        ));
    }

    if let Some(ref region) = props.env.region {
        if !REGION_RE.is_match(region) {
            errors.push(format!("region '{}' is not a valid region name", region));
        }
    }

    if let Some(ref account) = props.env.account {
        if !ACCOUNT_RE.is_match(account) {
            errors.push(format!("account '{}' must be 12 digits", account));
        }
    }

    for (key, value) in &props.tags {
        if key.is_empty() || key.len() > 128 {
            errors.push(format!("tag key '{}' must be 1-128 chars", key));
        }
        if key.starts_with("aws:") {
            errors.push(format!("tag key '{}' uses the reserved aws: prefix", key));
        }
        if value.len() > 256 {
            errors.push(format!("tag '{}' value exceeds 256 chars", key));
        }
    }

    errors
}

/// JSON schema for `stack.yaml`.
pub fn props_schema() -> Result<String, String> {
    let schema = schemars::schema_for!(StackProps);
    serde_json::to_string_pretty(&schema).map_err(|e| format!("schema serialize error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let props = load_props(&dir.path().join("stack.yaml")).unwrap();
        assert_eq!(props, StackProps::default());
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, "stack_name: Web\ntags:\n  owner: ops\n").unwrap();
        let props = load_props(&path).unwrap();
        assert_eq!(props.stack_name, "Web");
        assert_eq!(props.tags["owner"], "ops");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        assert!(parse_props("stack_name: [unclosed").is_err());
    }

    #[test]
    fn test_overrides() {
        let overrides = PropsOverrides {
            account: Some("123456789012".into()),
            region: Some("us-east-1".into()),
            tags: vec!["team=web".into(), "team=ops".into()],
        };
        let props = apply_overrides(StackProps::default(), &overrides).unwrap();
        assert_eq!(props.env.account.as_deref(), Some("123456789012"));
        assert_eq!(props.env.region.as_deref(), Some("us-east-1"));
        assert_eq!(props.tags.len(), 1);
        assert_eq!(props.tags["team"], "ops");
    }

    #[test]
    fn test_override_bad_tag() {
        let overrides = PropsOverrides {
            tags: vec!["novalue".into()],
            ..Default::default()
        };
        assert!(apply_overrides(StackProps::default(), &overrides).is_err());
    }

    #[test]
    fn test_validate_defaults_ok() {
        assert!(validate_props(&StackProps::default()).is_empty());
    }

    #[test]
    fn test_validate_bad_values() {
        let mut props = StackProps {
            stack_name: "1bad_name".into(),
            ..Default::default()
        };
        props.env.region = Some("Tokyo".into());
        props.env.account = Some("12345".into());
        props.tags.insert("aws:owner".into(), "x".into());
        let errors = validate_props(&props);
        assert!(errors.iter().any(|e| e.contains("stack name")));
        assert!(errors.iter().any(|e| e.contains("region")));
        assert!(errors.iter().any(|e| e.contains("12 digits")));
        assert!(errors.iter().any(|e| e.contains("reserved")));
    }

    #[test]
    fn test_validate_gov_region() {
        let mut props = StackProps::default();
        props.env.region = Some("us-gov-west-1".into());
        assert!(validate_props(&props).is_empty());
    }

    #[test]
    fn test_schema_mentions_fields() {
        let schema = props_schema().unwrap();
        assert!(schema.contains("stack_name"));
        assert!(schema.contains("tags"));
    }
}
