use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "forktools.toml";

/// Settings for all four tools. Every field defaults to the values the
/// fork's maintainers use, so the config file is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub changelog: ChangelogConfig,
    pub deps: DepsConfig,
    pub coredump: CoredumpConfig,
    pub log_to_css: LogToCssConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load `path` if given, else `forktools.toml` in the working directory
    /// when present, else the defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            debug!("Loading {}", DEFAULT_CONFIG_FILE);
            return Self::load(default_path);
        }

        Ok(Self::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChangelogConfig {
    pub path: PathBuf,
    pub builder_properties: PathBuf,
    pub builder_version_key: String,
    pub tag_prefix: String,
    pub repository_label: String,
    pub preamble: String,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("Changelog-Envoy"),
            builder_properties: PathBuf::from("ruleset2.0-eric-envoy.yaml"),
            builder_version_key: "ENVOY_BUILDER_VERSION".to_string(),
            tag_prefix: "envoy-v".to_string(),
            repository_label: "sc_envoy".to_string(),
            preamble: concat!(
                "This file contains local changes of Envoy performed by the development team.\n",
                "The purpose is to take track of these changes and map them to the corresponding internal version numbers.\n",
                "From 1.15.2-2 on, the builder version is also specified.\n",
                "\n"
            )
            .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DepsConfig {
    pub repository_locations: PathBuf,
    pub build_extensions: PathBuf,
    pub contrib_extensions: PathBuf,
    pub spec_variable: String,
    pub build_extensions_variable: String,
    pub contrib_extensions_variable: String,
    pub preserved_constants: Vec<String>,
    pub envoy_version: String,
    pub output: Option<PathBuf>,
}

impl Default for DepsConfig {
    fn default() -> Self {
        Self {
            repository_locations: PathBuf::from("bazel/repository_locations.bzl"),
            build_extensions: PathBuf::from("source/extensions/extensions_build_config.bzl"),
            contrib_extensions: PathBuf::from("contrib/contrib_build_config.bzl"),
            spec_variable: "REPOSITORY_LOCATIONS_SPEC".to_string(),
            build_extensions_variable: "EXTENSIONS".to_string(),
            contrib_extensions_variable: "CONTRIB_EXTENSIONS".to_string(),
            preserved_constants: vec!["PROTOBUF_VERSION".to_string()],
            envoy_version: "1_29_4".to_string(),
            output: None,
        }
    }
}

impl DepsConfig {
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "repository_locations_envoy_{}.bzl",
                self.envoy_version
            ))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoredumpConfig {
    pub image: String,
    pub container_name: String,
    pub tag_prefix: String,
    pub binary: String,
}

impl Default for CoredumpConfig {
    fn default() -> Self {
        Self {
            image: "armdocker.rnd.ericsson.se/proj-5g-bsf/envoy/eric-scp-envoy-base-debug"
                .to_string(),
            container_name: "envoy-core-dump".to_string(),
            tag_prefix: "envoy-v".to_string(),
            binary: "/usr/local/bin/envoy".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogToCssConfig {
    pub id_pattern: String,
    pub separator: String,
}

impl Default for LogToCssConfig {
    fn default() -> Self {
        Self {
            id_pattern: r"ul_id: ([A-Z0-9-]+)".to_string(),
            separator: "---".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::from_toml("").unwrap();

        assert_eq!(config.changelog.tag_prefix, "envoy-v");
        assert_eq!(config.deps.preserved_constants, vec!["PROTOBUF_VERSION"]);
        assert_eq!(config.coredump.container_name, "envoy-core-dump");
        assert_eq!(config.log_to_css.separator, "---");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = Config::from_toml(
            r#"
            [deps]
            envoy_version = "1_30_1"

            [coredump]
            image = "registry.local/envoy-debug"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.deps.output_path(),
            PathBuf::from("repository_locations_envoy_1_30_1.bzl")
        );
        assert_eq!(config.deps.spec_variable, "REPOSITORY_LOCATIONS_SPEC");
        assert_eq!(config.coredump.image, "registry.local/envoy-debug");
        assert_eq!(config.coredump.tag_prefix, "envoy-v");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forktools.toml");
        std::fs::write(&path, "[changelog]\nrepository_label = \"my_fork\"\n").unwrap();

        let config = Config::discover(Some(&path)).unwrap();
        assert_eq!(config.changelog.repository_label, "my_fork");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(Config::from_toml("[deps\n").is_err());
    }
}
