//! WiFi network discovery and configuration

use crate::{
    config_store::{ConfigStore, PendingConfigStore},
    device_client::DeviceClient,
    router::Reply,
    services::config_access::{ConfigAccess, WritePairs, write_all},
};
use anyhow::{Context, Result};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;

const BLE_REQUESTOR: &str = "piaware-ble-connect";

/// One visible network as reported by `iwlist scan`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WifiNetwork {
    pub wifi_cell: String,
    #[serde(rename = "wireless-ssid")]
    pub ssid: String,
    #[serde(rename = "is_5Ghz")]
    pub is_5ghz: bool,
    pub encrypted: bool,
    /// dBm
    pub signal: Option<i32>,
}

impl WifiNetwork {
    fn new(wifi_cell: String) -> Self {
        Self {
            wifi_cell,
            ..Default::default()
        }
    }

    fn is_visible(&self) -> bool {
        !self.ssid.is_empty() && !self.ssid.starts_with("\\x00")
    }
}

/// Parse `iwlist <iface> scan` output
///
/// Hidden networks are dropped, duplicates keep their first cell and the
/// result is ordered by ascending signal level.
pub fn parse_wifi_networks(scan: &str) -> Vec<WifiNetwork> {
    let mut cells: Vec<WifiNetwork> = Vec::new();

    for line in scan.lines().map(str::trim) {
        if let Some(rest) = line.strip_prefix("Cell ") {
            let cell: String = rest
                .chars()
                .take_while(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            if !cell.is_empty() {
                cells.push(WifiNetwork::new(cell));
                continue;
            }
        }

        let Some(network) = cells.last_mut() else {
            continue;
        };

        if let Some(essid) = line.strip_prefix("ESSID:\"") {
            if let Some(ssid) = essid.strip_suffix('"') {
                network.ssid = ssid.to_string();
            }
        } else if let Some(frequency) = line.strip_prefix("Frequency:") {
            if frequency.starts_with(|c: char| c.is_ascii_digit()) {
                network.is_5ghz = frequency.starts_with('5');
            }
        } else if let Some(key) = line.strip_prefix("Encryption key:") {
            network.encrypted = key == "on";
        } else if let Some(signal) = parse_signal_level(line) {
            network.signal = signal;
        }
    }

    let mut seen = HashSet::new();
    let mut networks: Vec<WifiNetwork> = cells
        .into_iter()
        .filter(WifiNetwork::is_visible)
        .filter(|network| seen.insert(network.ssid.clone()))
        .collect();
    networks.sort_by_key(|network| network.signal);

    networks
}

/// `Quality=70/70  Signal level=-40 dBm`. The outer option tells whether the
/// line is a quality line at all, the inner one whether the level is numeric.
fn parse_signal_level(line: &str) -> Option<Option<i32>> {
    let rest = line.strip_prefix("Quality=")?;
    let (_, level) = rest.split_once("Signal level=")?;
    let (level, _) = level.rsplit_once(" d")?;

    Some(level.trim().parse().ok())
}

pub struct WifiService;

impl WifiService {
    /// Visible networks from the last background scan, scanning live if
    /// none is available
    pub async fn networks<Device: DeviceClient>(device: &Device) -> Reply {
        match scan(device).await {
            Ok(networks) => {
                let mut body = Map::new();
                body.insert("wifi_networks".to_string(), networks);
                Reply::success(body)
            }
            Err(e) => {
                error!("error getting wifi networks: {e:#}");
                Reply::failure("Server error getting wifi networks")
            }
        }
    }

    /// Store WiFi credentials and restart the network to apply them
    ///
    /// Written settings stay in place if the restart cannot be launched.
    pub async fn set_config<Config, Pending, Device>(
        access: &ConfigAccess<Config, Pending>,
        device: &Device,
        pairs: &WritePairs,
        requestor: Option<&str>,
    ) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
        Device: DeviceClient,
    {
        if let Err(e) = write_all(access, pairs).await {
            return Reply::failure(e.write_message());
        }

        if requestor == Some(BLE_REQUESTOR) {
            info!("setting wifi configuration over bluetooth, enabling allow-ble-setup");
            if let Err(e) = access.set_config("allow-ble-setup", "yes").await {
                return Reply::failure(e.write_message());
            }
        }

        info!("restarting network");
        match device.restart_network().await {
            Ok(()) => Reply::success(Map::new()),
            Err(e) => {
                error!("failed to restart network: {e:#}");
                Reply::failure("Error restarting network")
            }
        }
    }
}

async fn scan<Device: DeviceClient>(device: &Device) -> Result<Value> {
    debug!("getting wifi networks");
    let mut scan = device.cached_wifi_scan().await;

    if scan.is_empty() {
        info!("scanning for wifi networks");
        let interface = device.wireless_interface().await?;
        scan = device.scan_wifi_networks(&interface).await?;
    }

    serde_json::to_value(parse_wifi_networks(&scan)).context("failed to serialize wifi networks")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::permission::PermissionPolicy;
    use anyhow::anyhow;
    use mockall::Sequence;
    use mockall_double::double;
    use serde_json::json;
    use std::sync::Arc;

    #[double]
    use crate::config_store::ConfigStore;
    #[double]
    use crate::config_store::PendingConfigStore;
    #[double]
    use crate::device_client::DeviceClient;

    const SCAN: &str = r#"wlan0     Scan completed :
          Cell 01 - Address: 00:11:22:33:44:55
                    Channel:6
                    Frequency:2.437 GHz (Channel 6)
                    Quality=41/70  Signal level=-69 dBm
                    Encryption key:on
                    ESSID:"HomeNetwork"
          Cell 02 - Address: 00:11:22:33:44:56
                    Frequency:5.18 GHz (Channel 36)
                    Quality=70/70  Signal level=-40 dBm
                    Encryption key:on
                    ESSID:"HomeNetwork_5G"
          Cell 03 - Address: 00:11:22:33:44:57
                    Frequency:2.462 GHz (Channel 11)
                    Quality=30/70  Signal level=-80 dBm
                    Encryption key:off
                    ESSID:"CoffeeShop"
          Cell 04 - Address: 00:11:22:33:44:58
                    Frequency:2.412 GHz (Channel 1)
                    Quality=50/70  Signal level=-60 dBm
                    Encryption key:on
                    ESSID:""
          Cell 05 - Address: 00:11:22:33:44:59
                    Frequency:2.412 GHz (Channel 1)
                    Quality=50/70  Signal level=-55 dBm
                    Encryption key:on
                    ESSID:"\x00\x00\x00\x00"
          Cell 06 - Address: 00:11:22:33:44:60
                    Frequency:2.437 GHz (Channel 6)
                    Quality=20/70  Signal level=-90 dBm
                    Encryption key:on
                    ESSID:"HomeNetwork"
"#;

    mod parser {
        use super::*;

        #[test]
        fn parses_visible_networks_sorted_by_signal() {
            let networks = parse_wifi_networks(SCAN);

            assert_eq!(
                networks,
                vec![
                    WifiNetwork {
                        wifi_cell: "03".to_string(),
                        ssid: "CoffeeShop".to_string(),
                        is_5ghz: false,
                        encrypted: false,
                        signal: Some(-80),
                    },
                    WifiNetwork {
                        wifi_cell: "01".to_string(),
                        ssid: "HomeNetwork".to_string(),
                        is_5ghz: false,
                        encrypted: true,
                        signal: Some(-69),
                    },
                    WifiNetwork {
                        wifi_cell: "02".to_string(),
                        ssid: "HomeNetwork_5G".to_string(),
                        is_5ghz: true,
                        encrypted: true,
                        signal: Some(-40),
                    },
                ]
            );
        }

        #[test]
        fn ignores_lines_before_first_cell() {
            let networks = parse_wifi_networks(
                "ESSID:\"Orphan\"\nCell 07 - Address: x\nESSID:\"Adopted\"\n",
            );
            assert_eq!(networks.len(), 1);
            assert_eq!(networks[0].ssid, "Adopted");
            assert_eq!(networks[0].wifi_cell, "07");
            assert_eq!(networks[0].signal, None);
        }

        #[test]
        fn empty_scan_has_no_networks() {
            assert!(parse_wifi_networks("").is_empty());
            assert!(parse_wifi_networks("wlan0     No scan results\n").is_empty());
        }

        #[test]
        fn serializes_with_wire_names() {
            let network = WifiNetwork {
                wifi_cell: "01".to_string(),
                ssid: "HomeNetwork".to_string(),
                is_5ghz: false,
                encrypted: true,
                signal: None,
            };
            assert_eq!(
                serde_json::to_value(network).expect("should serialize"),
                json!({
                    "wifi_cell": "01",
                    "wireless-ssid": "HomeNetwork",
                    "is_5Ghz": false,
                    "encrypted": true,
                    "signal": null
                })
            );
        }

        #[test]
        fn non_numeric_signal_level_is_none() {
            assert_eq!(
                parse_signal_level("Quality=0/70  Signal level=unknown dBm"),
                Some(None)
            );
            assert_eq!(parse_signal_level("Channel:6"), None);
        }
    }

    mod networks {
        use super::*;

        #[tokio::test]
        async fn uses_cached_scan_when_available() {
            let mut device_mock = DeviceClient::default();
            device_mock
                .expect_cached_wifi_scan()
                .returning(|| Box::pin(async { SCAN.to_string() }));
            device_mock.expect_scan_wifi_networks().never();

            let reply = WifiService::networks(&device_mock).await;

            assert_eq!(reply.body["success"], true);
            assert_eq!(reply.body["wifi_networks"].as_array().map(Vec::len), Some(3));
        }

        #[tokio::test]
        async fn scans_live_when_cache_is_empty() {
            let mut device_mock = DeviceClient::default();
            device_mock
                .expect_cached_wifi_scan()
                .returning(|| Box::pin(async { String::new() }));
            device_mock
                .expect_wireless_interface()
                .returning(|| Box::pin(async { Ok("wlan1".to_string()) }));
            device_mock
                .expect_scan_wifi_networks()
                .withf(|iface| iface == "wlan1")
                .times(1)
                .returning(|_| {
                    Box::pin(async {
                        Ok("Cell 01 - Address: x\nESSID:\"Live\"\nQuality=1/70  Signal level=-90 dBm\n"
                            .to_string())
                    })
                });

            let reply = WifiService::networks(&device_mock).await;

            assert_eq!(
                Value::Object(reply.body),
                json!({
                    "wifi_networks": [{
                        "wifi_cell": "01",
                        "wireless-ssid": "Live",
                        "is_5Ghz": false,
                        "encrypted": false,
                        "signal": -90
                    }],
                    "success": true
                })
            );
        }

        #[tokio::test]
        async fn scan_failure_is_reported() {
            let mut device_mock = DeviceClient::default();
            device_mock
                .expect_cached_wifi_scan()
                .returning(|| Box::pin(async { String::new() }));
            device_mock
                .expect_wireless_interface()
                .returning(|| Box::pin(async { Ok("wlan0".to_string()) }));
            device_mock
                .expect_scan_wifi_networks()
                .returning(|_| Box::pin(async { Err(anyhow!("iwlist: interface busy")) }));

            let reply = WifiService::networks(&device_mock).await;

            assert_eq!(
                Value::Object(reply.body),
                json!({"success": false, "error": "Server error getting wifi networks"})
            );
        }
    }

    mod set_config {
        use super::*;

        fn access(config: ConfigStore) -> ConfigAccess<ConfigStore, PendingConfigStore> {
            ConfigAccess::new(
                Arc::new(PermissionPolicy::default()),
                config,
                PendingConfigStore::default(),
            )
        }

        fn credentials() -> WritePairs {
            vec![
                ("wireless-ssid".to_string(), json!("HomeNetwork")),
                ("wireless-password".to_string(), json!("secret")),
            ]
        }

        #[tokio::test]
        async fn ble_requestor_enables_ble_setup_before_restart() {
            let mut seq = Sequence::new();
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_write()
                .withf(|key, _| key == "wireless-ssid")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Box::pin(async { Ok(()) }));
            config_mock
                .expect_write()
                .withf(|key, _| key == "wireless-password")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Box::pin(async { Ok(()) }));
            config_mock
                .expect_write()
                .withf(|key, value| key == "allow-ble-setup" && value == "yes")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Box::pin(async { Ok(()) }));
            let mut device_mock = DeviceClient::default();
            device_mock
                .expect_restart_network()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Box::pin(async { Ok(()) }));

            let reply = WifiService::set_config(
                &access(config_mock),
                &device_mock,
                &credentials(),
                Some("piaware-ble-connect"),
            )
            .await;

            assert_eq!(Value::Object(reply.body), json!({"success": true}));
        }

        #[tokio::test]
        async fn other_requestors_leave_ble_setup_alone() {
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_write()
                .withf(|key, _| key != "allow-ble-setup")
                .times(2)
                .returning(|_, _| Box::pin(async { Ok(()) }));
            let mut device_mock = DeviceClient::default();
            device_mock
                .expect_restart_network()
                .returning(|| Box::pin(async { Ok(()) }));

            let reply =
                WifiService::set_config(&access(config_mock), &device_mock, &credentials(), None)
                    .await;

            assert_eq!(reply.body["success"], true);
        }

        #[tokio::test]
        async fn denied_setting_skips_restart() {
            let mut config_mock = ConfigStore::default();
            config_mock.expect_write().never();
            let mut device_mock = DeviceClient::default();
            device_mock.expect_restart_network().never();

            let reply = WifiService::set_config(
                &access(config_mock),
                &device_mock,
                &vec![("image-type".to_string(), json!("piaware"))],
                None,
            )
            .await;

            assert_eq!(reply.body["error"], "Setting image-type is not allowed");
        }

        #[tokio::test]
        async fn restart_failure_keeps_written_settings() {
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_write()
                .times(2)
                .returning(|_, _| Box::pin(async { Ok(()) }));
            let mut device_mock = DeviceClient::default();
            device_mock
                .expect_restart_network()
                .returning(|| Box::pin(async { Err(anyhow!("failed to launch")) }));

            let reply =
                WifiService::set_config(&access(config_mock), &device_mock, &credentials(), None)
                    .await;

            assert_eq!(
                Value::Object(reply.body),
                json!({"success": false, "error": "Error restarting network"})
            );
        }
    }
}
