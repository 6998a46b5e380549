use anyhow::{Context, Result};
use std::{env, path::PathBuf, sync::OnceLock};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Optional replacement for the built-in permission policy
    pub permission_policy_path: Option<PathBuf>,

    /// Local files consulted or served by the configurator
    pub paths: PathConfig,

    /// External commands invoked on behalf of clients
    pub commands: CommandConfig,

    /// Network interfaces and probes
    pub network: NetworkConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub pending_config: PathBuf,
    pub piaware_status: PathBuf,
    pub flightfeeder_status: PathBuf,
    pub feeder_id: PathBuf,
    pub device_location: PathBuf,
    pub wifi_scan_results: PathBuf,
    pub proc_net_dev: PathBuf,
    pub sysfs_net: PathBuf,
}

#[derive(Clone, Debug)]
pub struct CommandConfig {
    pub piaware_config: PathBuf,
    /// Prefix for privileged commands, e.g. `sudo -n`. Empty runs them directly.
    pub sudo: Vec<String>,
    pub restart_receiver: Vec<String>,
    pub restart_network: Vec<String>,
    pub reboot: Vec<String>,
    pub iwlist: PathBuf,
    pub ip: PathBuf,
}

#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub route_probe_host: String,
    pub ethernet_interface: String,
    pub wireless_interface: String,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// all configuration from environment variables. Subsequent calls return the
    /// cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. The configurator cannot serve
    /// requests without a valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    fn load_internal() -> Result<Self> {
        let server = ServerConfig::load()?;
        let permission_policy_path = env::var("PERMISSION_POLICY_PATH").ok().map(PathBuf::from);
        let paths = PathConfig::load();
        let commands = CommandConfig::load();
        let network = NetworkConfig::load();

        Ok(Self {
            server,
            permission_policy_path,
            paths,
            commands,
            network,
        })
    }
}

impl ServerConfig {
    fn load() -> Result<Self> {
        let bind_address =
            env::var("CONFIGURATOR_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("CONFIGURATOR_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse::<u16>()
            .context("failed to parse CONFIGURATOR_PORT: invalid format")?;

        Ok(Self { bind_address, port })
    }
}

impl PathConfig {
    fn load() -> Self {
        Self {
            pending_config: path_var("PENDING_CONFIG_PATH", "/run/flightfeeder-volatile-config.txt"),
            piaware_status: path_var("PIAWARE_STATUS_PATH", "/var/run/piaware/status.json"),
            flightfeeder_status: path_var(
                "FLIGHTFEEDER_STATUS_PATH",
                "/var/run/flightfeeder/status.json",
            ),
            feeder_id: path_var("FEEDER_ID_PATH", "/var/cache/piaware/feeder_id"),
            device_location: path_var("DEVICE_LOCATION_PATH", "/var/cache/piaware/location"),
            wifi_scan_results: path_var(
                "WIFI_SCAN_RESULTS_PATH",
                "/var/run/piaware-configurator/available_wifi_networks",
            ),
            proc_net_dev: path_var("PROC_NET_DEV_PATH", "/proc/net/dev"),
            sysfs_net: path_var("SYSFS_NET_PATH", "/sys/class/net"),
        }
    }
}

impl CommandConfig {
    fn load() -> Self {
        Self {
            piaware_config: path_var("PIAWARE_CONFIG_BINARY", "/usr/bin/piaware-config"),
            sudo: command_var("SUDO_COMMAND", "sudo -n"),
            restart_receiver: command_var(
                "RESTART_RECEIVER_COMMAND",
                "/usr/bin/piaware-restart-receiver",
            ),
            restart_network: command_var(
                "RESTART_NETWORK_COMMAND",
                "/usr/bin/piaware-restart-network",
            ),
            reboot: command_var("REBOOT_COMMAND", "/sbin/shutdown -r now"),
            iwlist: path_var("IWLIST_BINARY", "/sbin/iwlist"),
            ip: path_var("IP_BINARY", "/sbin/ip"),
        }
    }

    /// Full argv for a privileged command: sudo prefix followed by the command itself.
    pub fn privileged(&self, command: &[String]) -> Vec<String> {
        self.sudo.iter().chain(command).cloned().collect()
    }
}

impl NetworkConfig {
    fn load() -> Self {
        Self {
            route_probe_host: env::var("ROUTE_PROBE_HOST")
                .unwrap_or_else(|_| "piaware.flightaware.com:1200".to_string()),
            ethernet_interface: env::var("ETHERNET_INTERFACE")
                .unwrap_or_else(|_| "eth0".to_string()),
            wireless_interface: env::var("WIRELESS_INTERFACE")
                .unwrap_or_else(|_| "wlan0".to_string()),
        }
    }
}

fn path_var(name: &str, default: &str) -> PathBuf {
    env::var(name).unwrap_or_else(|_| default.to_string()).into()
}

fn command_var(name: &str, default: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .split_whitespace()
        .map(String::from)
        .collect()
}
