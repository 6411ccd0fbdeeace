use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::capture::CaptureFilter;
use crate::graph::DEFAULT_MAX_STEPS;
use crate::oracle::OpenAiConfig;
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Worklist pops before a build closes as partial
    pub max_steps: usize,
    pub oracle: OracleSettings,
    /// Default rendering of the generated program
    pub output: OutputFormat,
    pub capture: CaptureSettings,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OracleKind {
    Heuristic,
    Openai,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    Python,
    Json,
    Plan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    pub kind: OracleKind,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub skip_static: bool,
}

impl CaptureSettings {
    pub fn filter(&self) -> CaptureFilter {
        CaptureFilter {
            skip_static: self.skip_static,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlOracleConfig {
    pub kind: Option<OracleKind>,
    pub model: Option<String>,
    pub alternate_model: Option<String>,
    pub api_base: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlOutputConfig {
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlCaptureConfig {
    pub skip_static: Option<bool>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    pub max_steps: Option<usize>,
    pub oracle: Option<TomlOracleConfig>,
    pub output: Option<TomlOutputConfig>,
    pub capture: Option<TomlCaptureConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            oracle: OracleSettings {
                kind: OracleKind::Heuristic,
                openai: OpenAiConfig::default(),
            },
            output: OutputFormat::Python,
            capture: CaptureSettings { skip_static: true },
        }
    }
}

impl Config {
    /// Load configuration from the data directory, merging with defaults
    pub fn load() -> Self {
        let config_file = config_path();

        // Create example config on first run
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }
        Self::load_from(&config_file)
    }

    /// Load configuration from `path`. A missing or malformed file yields
    /// the defaults.
    pub fn load_from(path: &Path) -> Self {
        let mut config = Config::default();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => return config,
        };
        match toml::from_str::<TomlConfig>(&contents) {
            Ok(toml_config) => config.merge(toml_config),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring malformed config file");
            }
        }
        config
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(max_steps) = toml_config.max_steps.filter(|n| *n > 0) {
            self.max_steps = max_steps;
        }

        if let Some(oracle) = toml_config.oracle {
            if let Some(kind) = oracle.kind {
                self.oracle.kind = kind;
            }
            let openai = &mut self.oracle.openai;
            if let Some(model) = oracle.model {
                openai.model = model;
            }
            if let Some(alternate_model) = oracle.alternate_model {
                openai.alternate_model = Some(alternate_model);
            }
            if let Some(api_base) = oracle.api_base {
                openai.api_base = api_base;
            }
            if let Some(api_key_env) = oracle.api_key_env {
                openai.api_key_env = api_key_env;
            }
            if let Some(timeout_secs) = oracle.timeout_secs {
                openai.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = oracle.max_retries {
                openai.max_retries = max_retries;
            }
        }

        if let Some(format) = toml_config.output.and_then(|o| o.format) {
            self.output = format;
        }

        if let Some(skip_static) = toml_config.capture.and_then(|c| c.skip_static) {
            self.capture.skip_static = skip_static;
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                if let Err(e) = fs::create_dir_all(parent) {
                    tracing::debug!(error = %e, "failed to create config directory");
                    return;
                }
            }
        }
        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::debug!(error = %e, "failed to write default config");
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_oracle(mut self, kind: OracleKind) -> Self {
        self.oracle.kind = kind;
        self
    }

    pub fn with_output(mut self, format: OutputFormat) -> Self {
        self.output = format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn example_config_parses_to_defaults() {
        let parsed: TomlConfig = toml::from_str(EXAMPLE_CONFIG).unwrap();
        let mut config = Config::default();
        config.merge(parsed);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
max_steps = 7

[oracle]
kind = "openai"
model = "gpt-4o"
alternate_model = "o1-mini"
max_retries = 5

[output]
format = "plan"

[capture]
skip_static = false
"#,
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.max_steps, 7);
        assert_eq!(config.oracle.kind, OracleKind::Openai);
        assert_eq!(config.oracle.openai.model, "gpt-4o");
        assert_eq!(
            config.oracle.openai.alternate_model.as_deref(),
            Some("o1-mini")
        );
        assert_eq!(config.oracle.openai.max_retries, 5);
        assert_eq!(
            config.oracle.openai.api_key_env,
            OpenAiConfig::default().api_key_env
        );
        assert_eq!(config.output, OutputFormat::Plan);
        assert!(!config.capture.filter().skip_static);
    }

    #[test]
    fn malformed_or_missing_files_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert_eq!(Config::load_from(&path), Config::default());

        fs::write(&path, "max_steps = \"many\"").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());

        fs::write(&path, "max_steps = 0").unwrap();
        assert_eq!(Config::load_from(&path).max_steps, DEFAULT_MAX_STEPS);
    }
}
