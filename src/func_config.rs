//! Function-name to `func_id`/method resolution, loaded once at startup
//! from a JSON file. Grounded on `original_source/src/common/func_config.h`.
//! Dynamic reload is out of scope (see `SPEC_FULL.md` Non-goals); the
//! config is immutable for the lifetime of the process.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FuncConfigError {
    #[error("failed to read func config file {path}: {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse func config file {path}: {source}")]
    ParseFailed {
        path: String,
        source: serde_json::Error,
    },

    #[error("duplicate function name in config: {0}")]
    DuplicateFunction(String),
}

#[derive(Debug, Deserialize)]
struct FuncConfigEntry {
    func_name: String,
    func_id: u16,
    #[serde(default)]
    methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FuncConfigFile {
    functions: Vec<FuncConfigEntry>,
}

/// One function's resolved identity: its numeric id and, for the gRPC
/// surface, the set of method names it declares (index into the vec is the
/// method id).
#[derive(Debug, Clone)]
pub struct FuncEntry {
    pub func_id: u16,
    pub methods: Vec<String>,
}

/// Immutable function-name → id/method table.
#[derive(Debug, Clone)]
pub struct FuncConfig {
    by_name: HashMap<String, FuncEntry>,
}

impl FuncConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FuncConfigError> {
        let path_str = path.as_ref().display().to_string();
        let contents = fs::read_to_string(path.as_ref()).map_err(|source| FuncConfigError::ReadFailed {
            path: path_str.clone(),
            source,
        })?;
        Self::parse(&contents, &path_str)
    }

    fn parse(contents: &str, path_str: &str) -> Result<Self, FuncConfigError> {
        let file: FuncConfigFile =
            serde_json::from_str(contents).map_err(|source| FuncConfigError::ParseFailed {
                path: path_str.to_string(),
                source,
            })?;

        let mut by_name = HashMap::with_capacity(file.functions.len());
        for entry in file.functions {
            if by_name
                .insert(
                    entry.func_name.clone(),
                    FuncEntry {
                        func_id: entry.func_id,
                        methods: entry.methods,
                    },
                )
                .is_some()
            {
                return Err(FuncConfigError::DuplicateFunction(entry.func_name));
            }
        }
        Ok(FuncConfig { by_name })
    }

    pub fn resolve(&self, func_name: &str) -> Option<&FuncEntry> {
        self.by_name.get(func_name)
    }

    pub fn resolve_method(&self, func_name: &str, method_name: &str) -> Option<(u16, u16)> {
        let entry = self.by_name.get(func_name)?;
        let method_id = entry.methods.iter().position(|m| m == method_name)? as u16;
        Some((entry.func_id, method_id))
    }

    #[cfg(test)]
    pub fn for_testing() -> Self {
        let mut by_name = HashMap::new();
        by_name.insert(
            "echo".to_string(),
            FuncEntry {
                func_id: 7,
                methods: vec!["Invoke".to_string()],
            },
        );
        FuncConfig { by_name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let json = r#"{"functions": [{"func_name": "echo", "func_id": 7, "methods": ["Invoke"]}]}"#;
        let cfg = FuncConfig::parse(json, "<test>").unwrap();
        let entry = cfg.resolve("echo").unwrap();
        assert_eq!(entry.func_id, 7);
        assert_eq!(entry.methods, vec!["Invoke".to_string()]);
    }

    #[test]
    fn resolve_unknown_function_returns_none() {
        let cfg = FuncConfig::for_testing();
        assert!(cfg.resolve("nonexistent").is_none());
    }

    #[test]
    fn resolve_method_maps_name_to_index() {
        let cfg = FuncConfig::for_testing();
        let (func_id, method_id) = cfg.resolve_method("echo", "Invoke").unwrap();
        assert_eq!(func_id, 7);
        assert_eq!(method_id, 0);
        assert!(cfg.resolve_method("echo", "NoSuchMethod").is_none());
    }

    #[test]
    fn duplicate_function_name_is_rejected() {
        let json = r#"{"functions": [
            {"func_name": "echo", "func_id": 7, "methods": []},
            {"func_name": "echo", "func_id": 8, "methods": []}
        ]}"#;
        let result = FuncConfig::parse(json, "<test>");
        assert!(matches!(result, Err(FuncConfigError::DuplicateFunction(ref n)) if n == "echo"));
    }
}
