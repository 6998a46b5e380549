use crate::{
    command::run_command,
    config::CommandConfig,
    services::marker::MarkerFile,
};
use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::path::PathBuf;
use tokio::fs;
use trait_variant::make;

/// Persisted device configuration
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait ConfigStore {
    async fn read(&self, setting: &str) -> Result<String>;
    async fn write(&self, setting: &str, value: &str) -> Result<()>;
}

/// Volatile, uncommitted network configuration
///
/// The backing resource existing is itself meaningful: it signals that
/// pending settings exist.
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait PendingConfigStore {
    async fn exists(&self) -> bool;
    /// Create the backing resource. Idempotent.
    async fn create(&self) -> Result<()>;
    /// Remove the backing resource. Idempotent.
    async fn remove(&self) -> Result<()>;
    /// `None` if the setting has no pending value
    async fn read(&self, setting: &str) -> Result<Option<String>>;
    async fn write(&self, setting: &str, value: &str) -> Result<()>;
    /// All pending settings in file order
    async fn entries(&self) -> Result<Vec<(String, String)>>;
}

/// `piaware-config` command line client
#[derive(Clone, Debug)]
pub struct PiawareConfigClient {
    binary: PathBuf,
    sudo: Vec<String>,
}

impl PiawareConfigClient {
    pub fn new(commands: &CommandConfig) -> Self {
        Self {
            binary: commands.piaware_config.clone(),
            sudo: commands.sudo.clone(),
        }
    }

    fn binary(&self) -> String {
        self.binary.to_string_lossy().into_owned()
    }
}

impl ConfigStore for PiawareConfigClient {
    async fn read(&self, setting: &str) -> Result<String> {
        let argv = vec![self.binary(), "-show".to_string(), setting.to_string()];
        let value = run_command(&argv)
            .await
            .context(format!("failed to read {setting}"))?;

        Ok(value.trim().to_string())
    }

    async fn write(&self, setting: &str, value: &str) -> Result<()> {
        let argv: Vec<String> = self
            .sudo
            .iter()
            .cloned()
            .chain([self.binary(), setting.to_string(), value.to_string()])
            .collect();

        run_command(&argv)
            .await
            .context(format!("failed to write {setting}"))?;

        Ok(())
    }
}

/// Pending network configuration kept in a flat `setting value` file
#[derive(Clone, Debug)]
pub struct VolatileConfigFile {
    marker: MarkerFile,
}

impl VolatileConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            marker: MarkerFile::new(path, "pending network settings"),
        }
    }

    async fn load(&self) -> Result<Vec<(String, String)>> {
        let path = self.marker.path();
        let content = fs::read_to_string(path)
            .await
            .context(format!("failed to read pending config: {path:?}"))?;

        Ok(parse_entries(&content))
    }

    async fn store(&self, entries: &[(String, String)]) -> Result<()> {
        let path = self.marker.path();
        fs::write(path, format_entries(entries))
            .await
            .context(format!("failed to write pending config: {path:?}"))
    }
}

impl PendingConfigStore for VolatileConfigFile {
    async fn exists(&self) -> bool {
        self.marker.exists().await
    }

    async fn create(&self) -> Result<()> {
        self.marker
            .set()
            .await
            .context("failed to create pending config")
    }

    async fn remove(&self) -> Result<()> {
        self.marker
            .clear()
            .await
            .map(|_| ())
            .context("failed to remove pending config")
    }

    async fn read(&self, setting: &str) -> Result<Option<String>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .find(|(key, _)| key == setting)
            .map(|(_, value)| value))
    }

    async fn write(&self, setting: &str, value: &str) -> Result<()> {
        let mut entries = self.load().await?;

        match entries.iter_mut().find(|(key, _)| key == setting) {
            Some(entry) => entry.1 = value.to_string(),
            None => entries.push((setting.to_string(), value.to_string())),
        }

        debug!("pending {setting} = {value:?}");
        self.store(&entries).await
    }

    async fn entries(&self) -> Result<Vec<(String, String)>> {
        self.load().await
    }
}

fn parse_entries(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key.to_string(), unquote(value.trim())),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

fn format_entries(entries: &[(String, String)]) -> String {
    entries
        .iter()
        .map(|(key, value)| format!("{key} {}\n", quote(value)))
        .collect()
}

/// Values that would not survive a bare `setting value` line are written as
/// JSON string literals, so line breaks and quotes are escaped.
fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.starts_with('"')
        || value.ends_with('"')
        || value.chars().any(|c| c.is_whitespace() || c.is_control());

    if needs_quotes {
        Value::String(value.to_string()).to_string()
    } else {
        value.to_string()
    }
}

fn unquote(value: &str) -> String {
    value
        .starts_with('"')
        .then(|| serde_json::from_str::<String>(value).ok())
        .flatten()
        .unwrap_or_else(|| value.to_string())
}
