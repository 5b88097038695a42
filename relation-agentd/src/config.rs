use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{bail, Context, Result};
use shared::protocol::{CTX_AUTH, CTX_KEY, CTX_MON_HOSTS, DEFAULT_RELATION};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    /// Local static configuration, read-only during evaluation
    #[serde(default)]
    pub options: LocalOptions,
    #[serde(default)]
    pub relations: RelationsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Local unit id used when publishing outputs. Defaults to the hostname.
    pub unit: Option<String>,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_reevaluate_interval")]
    pub reevaluate_interval_secs: u64,
}

/// The API serves credential text without authentication, so it may only
/// listen on a loopback address.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Flat option name to value mapping, e.g. `use-syslog = true`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct LocalOptions(BTreeMap<String, toml::Value>);

impl LocalOptions {
    /// Option value rendered as a lower-cased string, the form templates expect.
    pub fn get(&self, name: &str) -> Option<String> {
        let value = self.0.get(name)?;
        let text = match value {
            toml::Value::String(s) => s.clone(),
            toml::Value::Boolean(b) => b.to_string(),
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            other => other.to_string(),
        };
        Some(text.to_lowercase())
    }
}

impl FromIterator<(String, toml::Value)> for LocalOptions {
    fn from_iter<I: IntoIterator<Item = (String, toml::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Static description of one managed service. Never mutated at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    /// Relation whose peers supply the context
    #[serde(default = "default_relation")]
    pub relation: String,
    /// Ports the service listens on once started
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default = "default_required_inputs")]
    pub required_inputs: Vec<String>,
    /// Relations the ports are published on once started
    #[serde(default)]
    pub provided_outputs: Vec<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    pub config_dir: PathBuf,
    #[serde(default)]
    pub templates: Vec<TemplateTarget>,
    #[serde(default)]
    pub data_ready: Vec<DataReadyAction>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateTarget {
    pub source: String,
    pub target: PathBuf,
}

/// Side effect run once when a service becomes ready.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataReadyAction {
    Render { source: String, target: PathBuf },
    Log { message: String },
    Exec { argv: Vec<String> },
}

fn default_db_path() -> PathBuf {
    PathBuf::from("/var/lib/relation-agent/state.db")
}

fn default_template_dir() -> PathBuf {
    PathBuf::from("/var/lib/relation-agent/templates")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/relation-agent/relations")
}

fn default_outputs_dir() -> PathBuf {
    PathBuf::from("/var/lib/relation-agent/outputs")
}

fn default_poll_interval() -> u64 {
    5
}

fn default_reevaluate_interval() -> u64 {
    60
}

fn default_listen() -> String {
    "127.0.0.1:8054".to_string()
}

fn default_relation() -> String {
    DEFAULT_RELATION.to_string()
}

fn default_required_inputs() -> Vec<String> {
    [CTX_MON_HOSTS, CTX_AUTH, CTX_KEY]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            unit: None,
            db_path: default_db_path(),
            template_dir: default_template_dir(),
        }
    }
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            outputs_dir: default_outputs_dir(),
            poll_interval_secs: default_poll_interval(),
            reevaluate_interval_secs: default_reevaluate_interval(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn is_loopback(listen: &str) -> bool {
    match listen.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().is_loopback(),
        Err(_) => listen
            .rsplit_once(':')
            .is_some_and(|(host, _)| host == "localhost"),
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;

        let mut seen = HashSet::new();
        for service in &config.services {
            if !seen.insert(service.name.as_str()) {
                bail!("Duplicate service definition: {}", service.name);
            }
        }

        if !is_loopback(&config.api.listen) {
            bail!("API must listen on a loopback address, got {}", config.api.listen);
        }

        Ok(config)
    }

    /// Local unit id, falling back to the system hostname
    pub fn unit_id(&self) -> Result<String> {
        if let Some(unit) = &self.agent.unit {
            return Ok(unit.clone());
        }
        let hostname = hostname::get()
            .context("Failed to get system hostname")?
            .to_string_lossy()
            .to_string();
        Ok(hostname)
    }
}
