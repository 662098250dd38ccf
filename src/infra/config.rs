use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cli::{AppContext, InitArgs};

/// Config file names probed in the repository root, first hit wins
const CONFIG_FILES: [&str; 4] = ["diffdev.toml", ".diffdev.toml", "diffdev.yaml", "diffdev.json"];

/// Environment variable carrying the model API key
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Process-wide settings, loaded once at startup and passed by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config
{
    /// Context builder settings
    pub context: ContextConfig,

    /// Model client settings
    pub model: ModelConfig,

    /// Apply engine settings
    pub apply: ApplyConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IgnorePolicy
{
    /// Explicitly selected files are included even when ignored
    ExplicitOverrides,
    /// Ignored files are dropped even when explicitly selected
    Exclude,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig
{
    /// Ignore globs applied in addition to .gitignore
    pub ignore_patterns: Vec<String>,

    pub ignore_policy: IgnorePolicy,

    /// Keep building when some files cannot be read
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig
{
    pub name: String,
    pub api_base: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,

    /// Replaces the built-in system prompt when set
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind
{
    /// In-process hunk verification and atomic writes
    Internal,
    /// `git apply` against the working tree
    Git,
    /// Git when a repository is present, internal otherwise
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyConfig
{
    pub engine: EngineKind,

    /// Context lines around each hunk
    pub context_lines: usize,
}

impl Default for ContextConfig
{
    fn default() -> Self
    {
        Self {
            ignore_patterns: vec![
                "target/**".to_string(),
                "node_modules/**".to_string(),
                "dist/**".to_string(),
                "build/**".to_string(),
                ".git/**".to_string(),
                ".diffdev/**".to_string(),
                "**/*.pyc".to_string(),
                "**/__pycache__/**".to_string(),
                "**/.DS_Store".to_string(),
            ],
            ignore_policy: IgnorePolicy::ExplicitOverrides,
            partial: false,
        }
    }
}

impl Default for ModelConfig
{
    fn default() -> Self
    {
        Self {
            name: "claude-3-5-sonnet-latest".to_string(),
            api_base: "https://api.anthropic.com/v1".to_string(),
            max_tokens: 8192,
            timeout_secs: 300,
            system_prompt: None,
        }
    }
}

impl Default for ApplyConfig
{
    fn default() -> Self
    {
        Self { engine: EngineKind::Auto, context_lines: 3 }
    }
}

/// API credential read once from the environment.
#[derive(Clone)]
pub struct Credentials
{
    pub api_key: String,
}

impl std::fmt::Debug for Credentials
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result
    {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl Credentials
{
    /// `None` when the variable is unset or blank
    pub fn from_env() -> Option<Self>
    {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(|api_key| Self { api_key })
    }
}

/// Layered load: first config file found in `root`, then `DIFFDEV_*`
/// environment (`DIFFDEV_MODEL__NAME=...`).
pub fn load_config(root: &Path) -> Result<Config>
{
    let mut builder = config::Config::builder();

    for name in &CONFIG_FILES
    {
        let path = root.join(name);
        if path.exists()
        {
            tracing::debug!(path = %path.display(), "loading config file");
            builder = builder.add_source(config::File::from(path));
            break;
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DIFFDEV")
            .prefix_separator("_")
            .separator("__"),
    );

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let parsed: Config = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    Ok(parsed)
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path = args
        .path
        .join("diffdev.toml");

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}
