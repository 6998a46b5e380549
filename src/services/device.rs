//! Device information, state and privileged device actions
//!
//! Composite responses are rebuilt from their sources on every request.
//! Any failure collapses the whole response into a single error.

use crate::{
    config::PathConfig,
    config_store::{ConfigStore, PendingConfigStore},
    device_client::DeviceClient,
    router::Reply,
    services::config_access::{ConfigAccess, ConfigError},
};
use anyhow::{Context, Result};
use log::{debug, error, info};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

pub const API_VERSION: &str = "2.0.0";

const WIRELESS_SETTINGS: &[&str] = &[
    "wireless-network",
    "wireless-type",
    "wireless-address",
    "wireless-netmask",
    "wireless-gateway",
    "wireless-broadcast",
    "wireless-nameservers",
    "wireless-country",
    "wireless-ssid",
];

const WIRED_SETTINGS: &[&str] = &[
    "wired-network",
    "wired-type",
    "wired-address",
    "wired-netmask",
    "wired-gateway",
    "wired-broadcast",
    "wired-nameservers",
];

/// Files consulted to assemble the device state
#[derive(Clone, Debug)]
pub struct DeviceFiles {
    pub feeder_id: PathBuf,
    pub device_location: PathBuf,
    pub piaware_status: PathBuf,
    pub flightfeeder_status: PathBuf,
}

impl From<&PathConfig> for DeviceFiles {
    fn from(paths: &PathConfig) -> Self {
        Self {
            feeder_id: paths.feeder_id.clone(),
            device_location: paths.device_location.clone(),
            piaware_status: paths.piaware_status.clone(),
            flightfeeder_status: paths.flightfeeder_status.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum StateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Probe(#[from] anyhow::Error),
}

impl StateError {
    fn message(&self) -> String {
        match self {
            Self::Config(e) => format!(
                "Server error occurred reading wireless setting: {}",
                e.key()
            ),
            Self::Probe(_) => "Server error occurred retrieving device settings".to_string(),
        }
    }
}

/// Status document written by piaware or the flightfeeder software
#[derive(Debug)]
enum StatusDocument {
    FlightFeeder(Value),
    PiAware(Value),
}

impl StatusDocument {
    /// A flightfeeder status takes precedence over a piaware one
    async fn load(files: &DeviceFiles) -> Result<Option<Self>> {
        if exists(&files.flightfeeder_status).await {
            return Ok(Some(Self::FlightFeeder(
                read_json(&files.flightfeeder_status).await?,
            )));
        }
        if exists(&files.piaware_status).await {
            return Ok(Some(Self::PiAware(read_json(&files.piaware_status).await?)));
        }
        Ok(None)
    }

    fn json(&self) -> &Value {
        match self {
            Self::FlightFeeder(json) | Self::PiAware(json) => json,
        }
    }

    fn is_receiver_claimed(&self, feeder_id: &str) -> bool {
        match self {
            Self::FlightFeeder(_) => true,
            Self::PiAware(json) => {
                !feeder_id.is_empty()
                    && json.is_object()
                    && json.get("unclaimed_feeder_id").is_none()
            }
        }
    }

    fn is_connected_to_flightaware(&self) -> bool {
        self.json()
            .get("adept")
            .and_then(|adept| adept.get("status"))
            .and_then(Value::as_str)
            == Some("green")
    }

    fn site_id(&self) -> String {
        let Some(site_url) = self.json().get("site_url").and_then(Value::as_str) else {
            debug!("no site_url in status document");
            return String::new();
        };

        ["#stats-", "/stats/site/"]
            .iter()
            .find_map(|marker| site_url.split_once(marker))
            .map(|(_, site_id)| site_id.to_string())
            .unwrap_or_default()
    }
}

pub struct DeviceService;

impl DeviceService {
    /// API version and device identity
    pub async fn info<Config, Pending>(access: &ConfigAccess<Config, Pending>) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
    {
        let mut body = Map::new();
        body.insert("api_version".to_string(), json!(API_VERSION));

        let result = async {
            let image_type = access.get_config("image-type").await?;
            let is_flightfeeder = image_type.starts_with("flightfeeder");
            body.insert("image_type".to_string(), json!(image_type));

            if is_flightfeeder {
                let serial = access.get_config("flightfeeder-serial").await?;
                body.insert("flightfeeder_serial".to_string(), json!(serial));
            }
            Ok::<_, ConfigError>(())
        }
        .await;

        match result {
            Ok(()) => Reply::success(body),
            Err(e) => {
                error!("error getting device info: {e}");
                body.insert("success".to_string(), json!(false));
                body.insert(
                    "error".to_string(),
                    json!("Error obtaining full device information"),
                );
                Reply::ok(body)
            }
        }
    }

    /// Wireless, connectivity and FlightAware claim state of the device
    pub async fn state<Config, Pending, Device>(
        access: &ConfigAccess<Config, Pending>,
        device: &Device,
        files: &DeviceFiles,
    ) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
        Device: DeviceClient,
    {
        match device_state(access, device, files).await {
            Ok(body) => Reply::success(body),
            Err(e) => {
                error!("error getting device state: {e:#}");
                Reply::failure(e.message())
            }
        }
    }

    /// Configured and actual state of the wired and wireless interfaces
    pub async fn network_info<Config, Pending, Device>(
        access: &ConfigAccess<Config, Pending>,
        device: &Device,
        ethernet_interface: &str,
    ) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
        Device: DeviceClient,
    {
        match network_info(access, device, ethernet_interface).await {
            Ok(body) => Reply::success(body),
            Err(e) => {
                error!("error getting network info: {e:#}");
                Reply::failure(e.message())
            }
        }
    }

    pub async fn restart_receiver<Device: DeviceClient>(device: &Device) -> Reply {
        info!("restarting receiver");
        action_reply(device.restart_receiver().await, "Error restarting receiver")
    }

    pub async fn restart_network<Device: DeviceClient>(device: &Device) -> Reply {
        info!("restarting network");
        action_reply(device.restart_network().await, "Error restarting network")
    }

    pub async fn reboot<Device: DeviceClient>(device: &Device) -> Reply {
        info!("rebooting device");
        action_reply(device.reboot().await, "Error rebooting device")
    }
}

fn action_reply(result: Result<()>, message: &str) -> Reply {
    match result {
        Ok(()) => Reply::success(Map::new()),
        Err(e) => {
            error!("{message}: {e:#}");
            Reply::failure(message)
        }
    }
}

async fn device_state<Config, Pending, Device>(
    access: &ConfigAccess<Config, Pending>,
    device: &Device,
    files: &DeviceFiles,
) -> Result<Map<String, Value>, StateError>
where
    Config: ConfigStore,
    Pending: PendingConfigStore,
    Device: DeviceClient,
{
    let wireless_ssid = access.get_config("wireless-ssid").await?;
    let wireless_country = access.get_config("wireless-country").await?;

    let route = device.route_to_flightaware().await?;
    let is_connected_to_internet = route.exists && !route.ip_address.starts_with("169.254");

    let device_location = read_device_location(&files.device_location).await;
    let feeder_id = read_feeder_id(&files.feeder_id).await;

    let status = StatusDocument::load(files).await?;
    let (is_receiver_claimed, is_connected_to_fa, site_id) = match status {
        Some(status) => (
            status.is_receiver_claimed(&feeder_id),
            json!(status.is_connected_to_flightaware()),
            json!(status.site_id()),
        ),
        None => (false, Value::Null, Value::Null),
    };

    let mut body = Map::new();
    body.insert("wireless-country".to_string(), json!(wireless_country));
    body.insert("wireless-ssid".to_string(), json!(wireless_ssid));
    body.insert("wireless-ip".to_string(), json!(route.ip_address));
    body.insert(
        "is_connected_to_internet".to_string(),
        json!(is_connected_to_internet),
    );
    // wireless-password is write-only; clients still expect the field
    body.insert("is_password_set".to_string(), json!(true));
    body.insert("is_receiver_claimed".to_string(), json!(is_receiver_claimed));
    body.insert("is_connected_to_FA".to_string(), is_connected_to_fa);
    body.insert("feeder_id".to_string(), json!(feeder_id));
    body.insert("site_id".to_string(), site_id);
    body.insert("network_interface".to_string(), json!(route.interface));
    if let Some((lat, lon)) = device_location {
        body.insert("device_location".to_string(), json!([lat, lon]));
    }

    Ok(body)
}

async fn network_info<Config, Pending, Device>(
    access: &ConfigAccess<Config, Pending>,
    device: &Device,
    ethernet_interface: &str,
) -> Result<Map<String, Value>, StateError>
where
    Config: ConfigStore,
    Pending: PendingConfigStore,
    Device: DeviceClient,
{
    let mut body = Map::new();

    for key in WIRELESS_SETTINGS {
        body.insert(key.to_string(), json!(access.get_config(key).await?));
    }

    let wireless_interface = device.wireless_interface().await?;
    body.insert(
        "wlan-ipaddress".to_string(),
        json!(device.interface_ip_address(&wireless_interface).await?),
    );

    for key in WIRED_SETTINGS {
        body.insert(key.to_string(), json!(access.get_config(key).await?));
    }

    body.insert(
        "eth0-ipaddress".to_string(),
        json!(device.interface_ip_address(ethernet_interface).await?),
    );
    body.insert(
        "wifi-state".to_string(),
        json!(device.interface_state(&wireless_interface).await?),
    );
    body.insert(
        "ethernet-state".to_string(),
        json!(device.interface_state(ethernet_interface).await?),
    );

    Ok(body)
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

async fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .await
        .context(format!("failed to read {path:?}"))?;
    serde_json::from_str(&content).context(format!("failed to parse {path:?}"))
}

/// FlightAware unique feeder id, empty if not assigned yet
async fn read_feeder_id(path: &Path) -> String {
    fs::read_to_string(path)
        .await
        .map(|id| id.trim().to_string())
        .unwrap_or_else(|e| {
            debug!("no feeder id at {path:?}: {e}");
            String::new()
        })
}

/// Latitude and longitude, one per line. Anything else is ignored.
async fn read_device_location(path: &Path) -> Option<(String, String)> {
    let content = fs::read_to_string(path)
        .await
        .inspect_err(|e| debug!("no device location at {path:?}: {e}"))
        .ok()?;

    match content.lines().collect::<Vec<_>>().as_slice() {
        [lat, lon] => Some((lat.trim().to_string(), lon.trim().to_string())),
        _ => None,
    }
}
