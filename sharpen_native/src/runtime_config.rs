use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    #[error("failed to read runtime configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid runtime configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("runtimeOptions names no framework")]
    NoFramework,
}

/// The parts of `<name>.runtimeconfig.json` the host checks before handing the
/// file to hostfxr.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    pub runtime_options: RuntimeOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeOptions {
    pub tfm: Option<String>,
    pub framework: Option<FrameworkReference>,
    #[serde(default)]
    pub frameworks: Vec<FrameworkReference>,
    /// Present in self-contained deployments.
    #[serde(default)]
    pub included_frameworks: Vec<FrameworkReference>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FrameworkReference {
    pub name: String,
    pub version: Option<String>,
}

impl RuntimeConfig {
    pub fn parse(json: &str) -> Result<Self, RuntimeConfigError> {
        let config: RuntimeConfig = serde_json::from_str(json)?;
        if config.frameworks().next().is_none() {
            return Err(RuntimeConfigError::NoFramework);
        }
        Ok(config)
    }

    pub fn read(path: &Path) -> Result<Self, RuntimeConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::parse(&json)
    }

    pub fn frameworks(&self) -> impl Iterator<Item = &FrameworkReference> {
        let options = &self.runtime_options;
        options
            .framework
            .iter()
            .chain(&options.frameworks)
            .chain(&options.included_frameworks)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_a_framework_dependent_config() {
        let config = RuntimeConfig::parse(
            r#"{
                "runtimeOptions": {
                    "tfm": "net8.0",
                    "framework": { "name": "Microsoft.NETCore.App", "version": "8.0.0" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.runtime_options.tfm.as_deref(), Some("net8.0"));
        let names: Vec<_> = config.frameworks().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Microsoft.NETCore.App"]);
    }

    #[test]
    fn accepts_multiple_frameworks() {
        let config = RuntimeConfig::parse(
            r#"{ "runtimeOptions": { "frameworks": [
                { "name": "Microsoft.NETCore.App", "version": "8.0.0" },
                { "name": "Microsoft.WindowsDesktop.App", "version": "8.0.0" }
            ] } }"#,
        )
        .unwrap();
        assert_eq!(config.frameworks().count(), 2);
    }

    #[test]
    fn rejects_configs_without_frameworks() {
        let err = RuntimeConfig::parse(r#"{ "runtimeOptions": { "tfm": "net8.0" } }"#).unwrap_err();
        assert!(matches!(err, RuntimeConfigError::NoFramework));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            RuntimeConfig::parse("{ not json"),
            Err(RuntimeConfigError::Json(_))
        ));
        assert!(RuntimeConfig::parse("{}").is_err());
    }
}
