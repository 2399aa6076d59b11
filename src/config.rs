use std::path::Path;

use serde::Deserialize;

use crate::apply::{DEFAULT_VERIFY_COMMAND, DEFAULT_VERIFY_TIMEOUT_SECS};
use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::generate::DEFAULT_MODEL;

const DEFAULT_CONFIG_PATH: &str = "mend.toml";
const DEFAULT_OUTPUT_PATH: &str = "output.json";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub verify_command: Option<String>,
    pub verify_timeout: Option<u64>,
    pub model: Option<String>,
    pub prompt_dir: Option<String>,
    pub output: Option<String>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub verify_command: String,
    pub verify_timeout: u64,
    pub model: String,
    pub prompt_dir: Option<String>,
    pub output: String,
    pub dry_run: bool,
}

impl Config {
    /// Load the config file (explicit path must exist; the default path is
    /// optional) and merge it with CLI and environment overrides.
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match &cli.config {
            Some(path) => {
                let config_path = Path::new(path);
                if !config_path.exists() {
                    return Err(Error::ConfigNotFound(config_path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(config_path)?)?
            }
            None => {
                let config_path = Path::new(DEFAULT_CONFIG_PATH);
                if config_path.exists() {
                    parse_config(&std::fs::read_to_string(config_path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        Ok(merge(file_config, cli))
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(timeout) = config.verify_timeout
        && timeout == 0
    {
        return Err(Error::ConfigValidation(
            "verify_timeout must be > 0".to_string(),
        ));
    }
    if let Some(ref command) = config.verify_command
        && command.trim().is_empty()
    {
        return Err(Error::ConfigValidation(
            "verify_command must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Precedence for the verify command: CLI flag > `TEST_COMMAND` env > config
/// file > default. Everything else: CLI > config file > default.
pub fn merge(file: ConfigFile, cli: &Cli) -> Config {
    Config {
        verify_command: cli
            .verify_command
            .clone()
            .or_else(|| std::env::var("TEST_COMMAND").ok())
            .or(file.verify_command)
            .unwrap_or_else(|| DEFAULT_VERIFY_COMMAND.to_string()),
        verify_timeout: cli
            .verify_timeout
            .or(file.verify_timeout)
            .unwrap_or(DEFAULT_VERIFY_TIMEOUT_SECS),
        model: cli
            .model
            .clone()
            .or(file.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        prompt_dir: cli.prompt_dir.clone().or(file.prompt_dir),
        output: cli
            .output
            .clone()
            .or(file.output)
            .unwrap_or_else(|| DEFAULT_OUTPUT_PATH.to_string()),
        dry_run: cli.dry_run || file.dry_run.unwrap_or(false),
    }
}

/// Credentials resolved from the environment at startup. Deliberately not
/// `Debug`: tokens must not end up in logs.
#[derive(Clone)]
pub struct Secrets {
    pub github_token: String,
    pub gemini_api_key: String,
    pub neo4j: Option<Neo4jConfig>,
}

// Redacting `Debug` so tests can `unwrap_err()` a `Result<Secrets, _>` without
// risking tokens leaking into logs.
impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("github_token", &"<redacted>")
            .field("gemini_api_key", &"<redacted>")
            .field("neo4j", &self.neo4j.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

impl Secrets {
    pub fn from_env() -> Result<Self> {
        let github_token = std::env::var("GITHUB_TOKEN").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let missing: Vec<&str> = [
            ("GITHUB_TOKEN", &github_token),
            ("GEMINI_API_KEY", &gemini_api_key),
        ]
        .iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(Error::ConfigValidation(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        let neo4j = std::env::var("NEO4J_URI").ok().map(|uri| Neo4jConfig {
            uri,
            user: std::env::var("NEO4J_USER").unwrap_or_else(|_| "neo4j".to_string()),
            password: std::env::var("NEO4J_PASSWORD").unwrap_or_default(),
        });

        Ok(Self {
            github_token: github_token.unwrap_or_default(),
            gemini_api_key: gemini_api_key.unwrap_or_default(),
            neo4j,
        })
    }
}
