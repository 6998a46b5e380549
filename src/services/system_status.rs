//! System time and network traffic counters

use anyhow::{Context, Result, ensure};
use chrono::Utc;
use log::error;
use serde_json::{Map, Value, json};
use std::path::Path;
use tokio::fs;

/// Cumulative bytes over all non-loopback interfaces
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferTotals {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

pub struct SystemStatusService;

impl SystemStatusService {
    /// `{system_time, total_tx_bytes, total_rx_bytes}`; counters are null if
    /// they cannot be read
    pub async fn status(proc_net_dev: &Path) -> Map<String, Value> {
        let totals = fs::read_to_string(proc_net_dev)
            .await
            .context(format!("failed to read {proc_net_dev:?}"))
            .and_then(|content| parse_transfer_totals(&content))
            .inspect_err(|e| error!("error retrieving network transfer statistics: {e:#}"))
            .ok();

        let mut body = Map::new();
        body.insert(
            "system_time".to_string(),
            json!(Utc::now().format("%H:%M UTC").to_string()),
        );
        body.insert(
            "total_tx_bytes".to_string(),
            json!(totals.map(|t| t.tx_bytes)),
        );
        body.insert(
            "total_rx_bytes".to_string(),
            json!(totals.map(|t| t.rx_bytes)),
        );
        body
    }
}

/// Sum the byte counters of `/proc/net/dev`, skipping loopback
pub fn parse_transfer_totals(content: &str) -> Result<TransferTotals> {
    let mut totals = TransferTotals::default();

    // two header lines precede the per interface counters
    for line in content.lines().skip(2) {
        let Some((interface, counters)) = line.split_once(':') else {
            continue;
        };
        if interface.trim() == "lo" {
            continue;
        }

        let fields: Vec<&str> = counters.split_whitespace().collect();
        ensure!(
            fields.len() >= 9,
            "unexpected counter line for {}",
            interface.trim()
        );

        totals.rx_bytes += fields[0]
            .parse::<u64>()
            .context(format!("invalid rx bytes for {}", interface.trim()))?;
        totals.tx_bytes += fields[8]
            .parse::<u64>()
            .context(format!("invalid tx bytes for {}", interface.trim()))?;
    }

    Ok(totals)
}
