//! Whitelist-based access control for configuration settings
//!
//! A setting absent from a list is denied for that operation. The policy is
//! built once at startup and shared read-only between all handlers.

use anyhow::{Context, Result};
use log::info;
use serde::Deserialize;
use std::{collections::HashSet, fs, path::Path};

const READABLE_SETTINGS: &[&str] = &[
    "allow-ble-setup",
    "image-type",
    "flightfeeder-serial",
    "rtlsdr-gain",
    "uat-sdr-gain",
    "wireless-network",
    "wireless-type",
    "wireless-address",
    "wireless-ssid",
    "wireless-netmask",
    "wireless-gateway",
    "wireless-country",
    "wireless-broadcast",
    "wireless-nameservers",
    "wired-network",
    "wired-type",
    "wired-address",
    "wired-netmask",
    "wired-gateway",
    "wired-broadcast",
    "wired-nameservers",
];

const WRITABLE_SETTINGS: &[&str] = &[
    "allow-ble-setup",
    "rtlsdr-gain",
    "wireless-network",
    "wireless-type",
    "wireless-address",
    "wireless-ssid",
    "wireless-netmask",
    "wireless-gateway",
    "wireless-country",
    "wireless-broadcast",
    "wireless-nameservers",
    "wireless-password",
    "wired-network",
    "wired-type",
    "wired-address",
    "wired-netmask",
    "wired-gateway",
    "wired-broadcast",
    "wired-nameservers",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionPolicy {
    readable: HashSet<String>,
    writable: HashSet<String>,
}

#[derive(Deserialize)]
struct PolicyFile {
    #[serde(default)]
    readable: Vec<String>,
    #[serde(default)]
    writable: Vec<String>,
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self::new(
            READABLE_SETTINGS.iter().copied(),
            WRITABLE_SETTINGS.iter().copied(),
        )
    }
}

impl PermissionPolicy {
    pub fn new<R, W>(readable: R, writable: W) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        W: IntoIterator,
        W::Item: Into<String>,
    {
        Self {
            readable: readable.into_iter().map(Into::into).collect(),
            writable: writable.into_iter().map(Into::into).collect(),
        }
    }

    /// Load the policy from a JSON file of the form
    /// `{"readable": [...], "writable": [...]}`
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("failed to read permission policy: {path:?}"))?;
        let file: PolicyFile = serde_json::from_str(&content)
            .context(format!("failed to parse permission policy: {path:?}"))?;

        info!(
            "loaded permission policy from {path:?}: {} readable, {} writable",
            file.readable.len(),
            file.writable.len()
        );

        Ok(Self::new(file.readable, file.writable))
    }

    /// Built-in policy unless a policy file is configured
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn can_read(&self, setting: &str) -> bool {
        self.readable.contains(setting)
    }

    pub fn can_write(&self, setting: &str) -> bool {
        self.writable.contains(setting)
    }
}
