use crate::error::{ArborError, Result};
use crate::plan::PlanNode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    /// Dotted location of the offending node, e.g. `plan.children[2]`.
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == WarnLevel::Error
    }
}

// ---------------------------------------------------------------------------
// ConfigTree
// ---------------------------------------------------------------------------

/// Untyped configuration assembled from files and `KEY=VALUE` assignments.
///
/// Every source is applied as a JSON merge patch (RFC 7386) onto the tree, in
/// the order given, so later sources win and a `null` removes a key.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigTree {
    root: Value,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self {
            root: Value::Object(Map::new()),
        }
    }
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(root: Value) -> Result<Self> {
        if !root.is_object() {
            return Err(ArborError::NotAnObject);
        }
        Ok(Self { root })
    }

    /// Merges a `.json`, `.yaml` or `.yml` file into the tree.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let display = path.display().to_string();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let data = std::fs::read_to_string(path).map_err(|e| ArborError::ConfigFile {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        let patch: Value = match ext.as_deref() {
            Some("json") => serde_json::from_str(&data).map_err(|e| ArborError::ConfigFile {
                path: display.clone(),
                reason: e.to_string(),
            })?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&data).map_err(|e| ArborError::ConfigFile {
                    path: display.clone(),
                    reason: e.to_string(),
                })?
            }
            _ => return Err(ArborError::UnsupportedFormat(display)),
        };

        if !patch.is_object() {
            return Err(ArborError::ConfigFile {
                path: display,
                reason: "top level must be a mapping".to_string(),
            });
        }
        self.merge_patch(&patch)
    }

    /// Applies one `a.b.c=VALUE` assignment.
    ///
    /// The text is split at the first `=`; both sides are trimmed and must be
    /// non-empty. VALUE is parsed as JSON, and taken as a plain string when it
    /// is not valid JSON.
    pub fn set(&mut self, assignment: &str) -> Result<()> {
        let (key, value) = assignment
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, v)| !k.is_empty() && !v.is_empty())
            .ok_or_else(|| ArborError::InvalidAssignment(assignment.to_string()))?;

        if key.split('.').any(|segment| segment.trim().is_empty()) {
            return Err(ArborError::InvalidValue {
                key: key.to_string(),
                reason: "empty key segment".to_string(),
            });
        }

        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        let patch = key
            .rsplit('.')
            .fold(value, |node, segment| {
                let mut object = Map::new();
                object.insert(segment.trim().to_string(), node);
                Value::Object(object)
            });
        self.merge_patch(&patch)
    }

    /// RFC 7386 merge of `patch` into the tree. The patch must be an object,
    /// so the root stays one.
    pub fn merge_patch(&mut self, patch: &Value) -> Result<()> {
        if !patch.is_object() {
            return Err(ArborError::NotAnObject);
        }
        merge_patch(&mut self.root, patch);
        Ok(())
    }

    /// Looks up a dotted path, e.g. `log.level`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.root, |node, segment| node.as_object()?.get(segment))
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn typed<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.root.clone())?)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }
}

/// RFC 7386 JSON merge patch.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// One of `error`, `warn`, `info`, `debug`, `trace`. When absent the
    /// command picks its own default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Typed view of a [`ConfigTree`]. Keys it does not know are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    /// Initial values of the named flags plan conditions wait on.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub flags: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanNode>,
}

impl AppConfig {
    pub fn from_tree(tree: &ConfigTree) -> Result<Self> {
        tree.typed()
    }

    pub fn log_level(&self, default: &str) -> String {
        self.log
            .level
            .clone()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn plan(&self) -> Result<&PlanNode> {
        self.plan.as_ref().ok_or(ArborError::NoPlan)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Some(level) = &self.log.level {
            if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
                warnings.push(ConfigWarning::warning(
                    "log.level",
                    format!("unknown log level '{level}', expected one of {}", LOG_LEVELS.join(", ")),
                ));
            }
        }

        match &self.plan {
            Some(plan) => {
                let known = self.flags.keys().cloned().collect();
                warnings.extend(plan.validate(&known));
            }
            None => warnings.push(ConfigWarning::error("plan", "no plan configured")),
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn merge_patch_follows_rfc_7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}});
        merge_patch(&mut target, &json!({"a": "z", "c": {"f": null}}));
        assert_eq!(target, json!({"a": "z", "c": {"d": "e"}}));

        let mut target = json!({"a": [1, 2]});
        merge_patch(&mut target, &json!({"a": {"b": "c"}}));
        assert_eq!(target, json!({"a": {"b": "c"}}));
    }

    #[test]
    fn set_builds_nested_objects() {
        let mut tree = ConfigTree::new();
        tree.set("log.level = debug").unwrap();
        tree.set("plan.ms=250").unwrap();
        tree.set("flags.ready=true").unwrap();

        assert_eq!(tree.get("log.level"), Some(&json!("debug")));
        assert_eq!(tree.get("plan.ms"), Some(&json!(250)));
        assert_eq!(tree.get("flags.ready"), Some(&json!(true)));
        assert_eq!(tree.get("flags.missing"), None);
    }

    #[test]
    fn set_parses_json_values() {
        let mut tree = ConfigTree::new();
        tree.set(r#"a={"x": [1, 2]}"#).unwrap();
        assert_eq!(tree.get("a.x"), Some(&json!([1, 2])));
        // null deletes
        tree.set("a=null").unwrap();
        assert_eq!(tree.get("a"), None);
    }

    #[test]
    fn set_rejects_malformed_assignments() {
        let mut tree = ConfigTree::new();
        for bad in ["novalue", "=1", "a=", "  =  "] {
            assert!(
                matches!(tree.set(bad), Err(ArborError::InvalidAssignment(_))),
                "{bad} should be rejected"
            );
        }
        assert!(matches!(tree.set("a..b=1"), Err(ArborError::InvalidValue { .. })));
        assert_eq!(tree, ConfigTree::new());
    }

    #[test]
    fn load_file_merges_json_and_yaml_in_order() {
        let dir = TempDir::new().unwrap();
        let json_path = dir.path().join("base.json");
        let yaml_path = dir.path().join("override.yaml");
        std::fs::write(&json_path, r#"{"log": {"level": "info"}, "flags": {"a": true}}"#).unwrap();
        std::fs::write(&yaml_path, "log:\n  level: trace\nflags:\n  b: false\n").unwrap();

        let mut tree = ConfigTree::new();
        tree.load_file(&json_path).unwrap();
        tree.load_file(&yaml_path).unwrap();

        assert_eq!(tree.get("log.level"), Some(&json!("trace")));
        assert_eq!(tree.get("flags.a"), Some(&json!(true)));
        assert_eq!(tree.get("flags.b"), Some(&json!(false)));
    }

    #[test]
    fn load_file_rejects_unknown_extensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf.toml");
        std::fs::write(&path, "a = 1").unwrap();
        let mut tree = ConfigTree::new();
        assert!(matches!(tree.load_file(&path), Err(ArborError::UnsupportedFormat(_))));
    }

    #[test]
    fn load_file_reports_parse_errors_with_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let mut tree = ConfigTree::new();
        let err = tree.load_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }

    #[test]
    fn load_file_rejects_non_mapping_root() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("list.yml");
        std::fs::write(&path, "- 1\n- 2\n").unwrap();
        let mut tree = ConfigTree::new();
        assert!(matches!(tree.load_file(&path), Err(ArborError::ConfigFile { .. })));
    }

    #[test]
    fn app_config_reads_typed_view() {
        let mut tree = ConfigTree::new();
        tree.set("log.level=debug").unwrap();
        tree.set(r#"plan={"type": "sleep", "ms": 5}"#).unwrap();
        tree.set("unrelated.key=1").unwrap();

        let cfg = AppConfig::from_tree(&tree).unwrap();
        assert_eq!(cfg.log_level("warn"), "debug");
        assert!(matches!(cfg.plan(), Ok(PlanNode::Sleep { ms: 5, .. })));
    }

    #[test]
    fn app_config_defaults() {
        let cfg = AppConfig::from_tree(&ConfigTree::new()).unwrap();
        assert_eq!(cfg.log_level("warn"), "warn");
        assert!(matches!(cfg.plan(), Err(ArborError::NoPlan)));
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].is_error());
    }

    #[test]
    fn validate_flags_unknown_log_level() {
        let cfg = AppConfig {
            log: LogConfig {
                level: Some("loud".to_string()),
            },
            plan: Some(PlanNode::succeed()),
            ..AppConfig::default()
        };
        let warnings = cfg.validate();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, "log.level");
        assert_eq!(warnings[0].level, WarnLevel::Warning);
    }
}
