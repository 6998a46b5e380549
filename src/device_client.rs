use crate::{
    command::{launch_command, run_command},
    config::{CommandConfig, NetworkConfig, PathConfig},
};
use anyhow::{Context, Result};
use log::{debug, error, warn};
#[cfg(any(test, feature = "mock"))]
use mockall::automock;
use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
};
use tokio::{fs, net::lookup_host};
use trait_variant::make;

/// Outcome of probing the route towards FlightAware
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Route {
    pub exists: bool,
    /// Source address the kernel would use, empty if unknown
    pub ip_address: String,
    /// Outgoing interface, empty if unknown
    pub interface: String,
}

/// Device probes and privileged actions
#[make(Send)]
#[cfg_attr(any(test, feature = "mock"), automock)]
pub trait DeviceClient {
    async fn route_to_flightaware(&self) -> Result<Route>;
    /// First wireless interface found, falling back to the configured default
    async fn wireless_interface(&self) -> Result<String>;
    /// IPv4 address of the interface, empty if it has none
    async fn interface_ip_address(&self, interface: &str) -> Result<String>;
    async fn interface_state(&self, interface: &str) -> Result<String>;
    /// Most recent background scan, empty if unavailable
    async fn cached_wifi_scan(&self) -> String;
    async fn scan_wifi_networks(&self, interface: &str) -> Result<String>;
    async fn restart_receiver(&self) -> Result<()>;
    async fn restart_network(&self) -> Result<()>;
    async fn reboot(&self) -> Result<()>;
}

/// [`DeviceClient`] backed by `ip`, `iwlist`, sysfs and the restart scripts
#[derive(Clone, Debug)]
pub struct SysInfoClient {
    commands: CommandConfig,
    network: NetworkConfig,
    sysfs_net: PathBuf,
    wifi_scan_results: PathBuf,
}

impl SysInfoClient {
    pub fn new(commands: &CommandConfig, network: &NetworkConfig, paths: &PathConfig) -> Self {
        Self {
            commands: commands.clone(),
            network: network.clone(),
            sysfs_net: paths.sysfs_net.clone(),
            wifi_scan_results: paths.wifi_scan_results.clone(),
        }
    }

    fn ip(&self) -> String {
        self.commands.ip.to_string_lossy().into_owned()
    }

    async fn probe_target(&self) -> Option<SocketAddr> {
        let host = &self.network.route_probe_host;
        match lookup_host(host.as_str()).await {
            Ok(mut addrs) => addrs.find(SocketAddr::is_ipv4),
            Err(e) => {
                debug!("cannot resolve {host}: {e}");
                None
            }
        }
    }

    fn launch_privileged(&self, command: &[String]) -> Result<()> {
        launch_command(&self.commands.privileged(command))
    }
}

impl DeviceClient for SysInfoClient {
    async fn route_to_flightaware(&self) -> Result<Route> {
        let Some(target) = self.probe_target().await else {
            return Ok(Route::default());
        };

        let argv = vec![
            self.ip(),
            "route".to_string(),
            "get".to_string(),
            target.ip().to_string(),
        ];

        match run_command(&argv).await {
            Ok(output) => Ok(parse_route(&output)),
            Err(e) => {
                warn!("no route to {target}: {e:#}");
                Ok(Route::default())
            }
        }
    }

    async fn wireless_interface(&self) -> Result<String> {
        Ok(find_wireless_interface(&self.sysfs_net)
            .await?
            .unwrap_or_else(|| self.network.wireless_interface.clone()))
    }

    async fn interface_ip_address(&self, interface: &str) -> Result<String> {
        if !fs::try_exists(self.sysfs_net.join(interface))
            .await
            .unwrap_or(false)
        {
            return Ok(String::new());
        }

        let argv = vec![
            self.ip(),
            "-o".to_string(),
            "-4".to_string(),
            "addr".to_string(),
            "show".to_string(),
            "dev".to_string(),
            interface.to_string(),
        ];
        let output = run_command(&argv)
            .await
            .context(format!("failed to get address of {interface}"))?;

        Ok(parse_inet_address(&output).unwrap_or_default())
    }

    async fn interface_state(&self, interface: &str) -> Result<String> {
        read_operstate(&self.sysfs_net, interface).await
    }

    async fn cached_wifi_scan(&self) -> String {
        fs::read_to_string(&self.wifi_scan_results)
            .await
            .unwrap_or_else(|e| {
                error!(
                    "failed to read wifi scan results {:?}: {e}",
                    self.wifi_scan_results
                );
                String::new()
            })
    }

    async fn scan_wifi_networks(&self, interface: &str) -> Result<String> {
        let command = vec![
            self.commands.iwlist.to_string_lossy().into_owned(),
            interface.to_string(),
            "scan".to_string(),
        ];

        run_command(&self.commands.privileged(&command))
            .await
            .context(format!("failed to scan wifi networks on {interface}"))
    }

    async fn restart_receiver(&self) -> Result<()> {
        self.launch_privileged(&self.commands.restart_receiver)
    }

    async fn restart_network(&self) -> Result<()> {
        self.launch_privileged(&self.commands.restart_network)
    }

    async fn reboot(&self) -> Result<()> {
        self.launch_privileged(&self.commands.reboot)
    }
}

/// Parse `ip route get` output, e.g.
/// `70.42.6.250 via 192.168.1.1 dev wlan0 src 192.168.1.23 uid 1000`
fn parse_route(output: &str) -> Route {
    let mut tokens = output.split_whitespace();
    let mut route = Route::default();

    while let Some(token) = tokens.next() {
        match token {
            "dev" => route.interface = tokens.next().unwrap_or_default().to_string(),
            "src" => route.ip_address = tokens.next().unwrap_or_default().to_string(),
            _ => {}
        }
    }

    route.exists = !route.interface.is_empty();
    route
}

/// First IPv4 address in `ip -o -4 addr show` output, without prefix length
fn parse_inet_address(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    tokens.find(|token| *token == "inet")?;
    let address = tokens.next()?;

    Some(address.split('/').next().unwrap_or(address).to_string())
}

async fn find_wireless_interface(sysfs_net: &Path) -> Result<Option<String>> {
    let mut entries = match fs::read_dir(sysfs_net).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context(format!("failed to list {sysfs_net:?}")),
    };

    let mut interfaces = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .context(format!("failed to list {sysfs_net:?}"))?
    {
        if fs::try_exists(entry.path().join("wireless"))
            .await
            .unwrap_or(false)
        {
            interfaces.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    interfaces.sort();

    Ok(interfaces.into_iter().next())
}

async fn read_operstate(sysfs_net: &Path, interface: &str) -> Result<String> {
    let path = sysfs_net.join(interface).join("operstate");
    match fs::read_to_string(&path).await {
        Ok(state) => Ok(state.trim().to_string()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok("down".to_string()),
        Err(e) => Err(e).context(format!("failed to read {path:?}")),
    }
}
