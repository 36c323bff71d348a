use crate::command::{CommandBuilder, UserAgent};
use crate::product::{Product, ProductSpec};
use crate::retry::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration loaded from uls.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct UlsConfig {
    pub runtime: RuntimeConfig,
    pub input: InputConfig,
    pub user_agent: UserAgentConfig,
    pub products: ProductsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter every producer binary is run through. Empty runs the
    /// binary directly.
    pub interpreter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Seconds to wait before the first health check.
    pub run_delay_secs: u64,
    /// Startup attempts before giving up.
    pub rerun_retries: u32,
    /// Seconds between startup attempts.
    pub rerun_delay_secs: u64,
    pub format_choices: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    pub suite: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProductsConfig {
    pub eaa: ProductConfig,
    pub etp: ProductConfig,
    pub mfa: ProductConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ProductConfig {
    pub binary: PathBuf,
    pub feeds: Vec<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

// --- Default implementations ---

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            run_delay_secs: 1,
            rerun_retries: 3,
            rerun_delay_secs: 1,
            format_choices: vec!["JSON".to_string(), "TEXT".to_string()],
        }
    }
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            suite: "ULS".to_string(),
        }
    }
}

fn product_config(binary: &str, feeds: &[&str]) -> ProductConfig {
    ProductConfig {
        binary: PathBuf::from(binary),
        feeds: feeds.iter().map(|f| f.to_string()).collect(),
    }
}

impl Default for ProductsConfig {
    fn default() -> Self {
        Self {
            eaa: product_config("ext/cli-eaa/bin/akamai-eaa", &["ADMIN", "ACCESS", "CONHEALTH"]),
            etp: product_config("ext/cli-etp/bin/akamai-etp", &["THREAT", "AUP", "DNS", "PROXY"]),
            mfa: product_config("ext/cli-mfa/bin/akamai-mfa", &["AUTH"]),
        }
    }
}

impl ProductsConfig {
    pub fn get(&self, product: Product) -> &ProductConfig {
        match product {
            Product::Eaa => &self.eaa,
            Product::Etp => &self.etp,
            Product::Mfa => &self.mfa,
        }
    }
}

impl UlsConfig {
    /// Load `path`, falling back to built-in defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn product_specs(&self) -> Vec<ProductSpec> {
        Product::ALL
            .iter()
            .map(|&product| {
                let cfg = self.products.get(product);
                ProductSpec::new(product, &cfg.binary, cfg.feeds.clone())
            })
            .collect()
    }

    pub fn command_builder(&self) -> CommandBuilder {
        CommandBuilder {
            runtime: Some(self.runtime.interpreter.clone()).filter(|rt| !rt.is_empty()),
            format_choices: self.input.format_choices.clone(),
            user_agent: UserAgent {
                suite: self.user_agent.suite.clone(),
                ..UserAgent::default()
            },
            products: self.product_specs(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.input.run_delay_secs),
            self.input.rerun_retries,
            Duration::from_secs(self.input.rerun_delay_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = UlsConfig::load(&dir.path().join("uls.toml")).unwrap();
        assert_eq!(config.runtime.interpreter, "python3");
        assert_eq!(config.input.rerun_retries, 3);
        assert_eq!(config.products.eaa.feeds[0], "ADMIN");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uls.toml");
        std::fs::write(
            &path,
            r#"
[input]
rerun_retries = 5

[products.eaa]
binary = "/opt/eaa/bin/akamai-eaa"
feeds = ["AUDIT", "CONHEALTH"]
"#,
        )
        .unwrap();

        let config = UlsConfig::load(&path).unwrap();
        assert_eq!(config.input.rerun_retries, 5);
        assert_eq!(config.input.run_delay_secs, 1);
        assert_eq!(config.input.format_choices, vec!["JSON", "TEXT"]);
        assert_eq!(
            config.products.eaa.binary,
            PathBuf::from("/opt/eaa/bin/akamai-eaa")
        );
        assert_eq!(config.products.eaa.feeds, vec!["AUDIT", "CONHEALTH"]);
        assert_eq!(config.products.mfa.feeds, vec!["AUTH"]);
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uls.toml");
        std::fs::write(&path, "[input\nrerun_retries = ").unwrap();
        let err = UlsConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("uls.toml"));
    }

    #[test]
    fn test_directory_path_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = UlsConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_command_builder_from_config() {
        let mut config = UlsConfig::default();
        config.runtime.interpreter = String::new();
        config.user_agent.suite = "TEST".to_string();

        let builder = config.command_builder();
        assert_eq!(builder.runtime, None);
        assert_eq!(builder.user_agent.suite, "TEST");
        assert_eq!(builder.products.len(), 3);
        let etp = builder.spec_for(Product::Etp).unwrap();
        assert_eq!(etp.feeds[0], "THREAT");
    }

    #[test]
    fn test_retry_policy_from_config() {
        let mut config = UlsConfig::default();
        config.input.run_delay_secs = 2;
        config.input.rerun_retries = 4;
        config.input.rerun_delay_secs = 7;

        let policy = config.retry_policy();
        assert_eq!(policy.settle_delay(), Duration::from_secs(2));
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.retry_delay(), Duration::from_secs(7));
    }
}
