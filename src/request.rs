//! Validation and classification of inbound configurator requests
//!
//! A request body is a JSON object `{"request": <kind>, "request_payload": ...}`.
//! Anything that fails here is rejected with a 4xx status before a handler runs.

use crate::services::config_access::WritePairs;
use actix_web::http::StatusCode;
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("content-type must be application/json")]
    UnsupportedMediaType,
    #[error("Data must be UTF-8 encoded")]
    BadEncoding,
    #[error("Invalid json in request")]
    MalformedPayload,
    #[error("Missing request field")]
    MissingRequest,
    #[error("Unsupported request")]
    UnsupportedRequest(String),
    #[error("{0}")]
    MissingPayload(&'static str),
    #[error("{0}")]
    InvalidPayload(&'static str),
}

impl RequestError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

const MISSING_PAYLOAD: &str = "Missing request_payload field";
const INVALID_READ_PAYLOAD: &str = "Request_payload must be a list of settings to read";
const INVALID_WRITE_PAYLOAD: &str = "request_payload must be a dict";
const MISSING_WIFI_PAYLOAD: &str = "Missing payload in request";
const INVALID_WIFI_PAYLOAD: &str = "Invalid JSON format";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestKind {
    ReadConfig,
    WriteConfig,
    ReadPendingConfig,
    WritePendingConfig,
    GetDeviceInfo,
    GetDeviceState,
    GetNetworkInfo,
    GetWifiNetworks,
    SetWifiConfig,
    RestartReceiver,
    RestartNetwork,
    Reboot,
    SavePendingNetworkSettings,
    DeletePendingNetworkSettings,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadConfig => "piaware_config_read",
            Self::WriteConfig => "piaware_config_write",
            Self::ReadPendingConfig => "get_pending_network_config",
            Self::WritePendingConfig => "set_pending_network_config",
            Self::GetDeviceInfo => "get_device_info",
            Self::GetDeviceState => "get_device_state",
            Self::GetNetworkInfo => "get_network_info",
            Self::GetWifiNetworks => "get_wifi_networks",
            Self::SetWifiConfig => "set_wifi_config",
            Self::RestartReceiver => "restart_receiver",
            Self::RestartNetwork => "restart_network",
            Self::Reboot => "reboot",
            Self::SavePendingNetworkSettings => "save_pending_network_settings",
            Self::DeletePendingNetworkSettings => "delete_pending_network_settings",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestKind {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "piaware_config_read" => Self::ReadConfig,
            "piaware_config_write" => Self::WriteConfig,
            "get_pending_network_config" => Self::ReadPendingConfig,
            "set_pending_network_config" => Self::WritePendingConfig,
            "get_device_info" => Self::GetDeviceInfo,
            "get_device_state" => Self::GetDeviceState,
            "get_network_info" => Self::GetNetworkInfo,
            "get_wifi_networks" => Self::GetWifiNetworks,
            "set_wifi_config" => Self::SetWifiConfig,
            "restart_receiver" => Self::RestartReceiver,
            "restart_network" => Self::RestartNetwork,
            "reboot" => Self::Reboot,
            "save_pending_network_settings" => Self::SavePendingNetworkSettings,
            "delete_pending_network_settings" => Self::DeletePendingNetworkSettings,
            other => return Err(RequestError::UnsupportedRequest(other.to_string())),
        };
        Ok(kind)
    }
}

/// A validated request, ready for dispatch
#[derive(Clone, Debug, PartialEq)]
pub enum ConfigRequest {
    ReadConfig(Vec<String>),
    WriteConfig(WritePairs),
    ReadPendingConfig(Vec<String>),
    WritePendingConfig(WritePairs),
    GetDeviceInfo,
    GetDeviceState,
    GetNetworkInfo,
    GetWifiNetworks,
    SetWifiConfig {
        pairs: WritePairs,
        requestor: Option<String>,
    },
    RestartReceiver,
    RestartNetwork,
    Reboot,
    SavePendingNetworkSettings,
    DeletePendingNetworkSettings,
}

impl ConfigRequest {
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::ReadConfig(_) => RequestKind::ReadConfig,
            Self::WriteConfig(_) => RequestKind::WriteConfig,
            Self::ReadPendingConfig(_) => RequestKind::ReadPendingConfig,
            Self::WritePendingConfig(_) => RequestKind::WritePendingConfig,
            Self::GetDeviceInfo => RequestKind::GetDeviceInfo,
            Self::GetDeviceState => RequestKind::GetDeviceState,
            Self::GetNetworkInfo => RequestKind::GetNetworkInfo,
            Self::GetWifiNetworks => RequestKind::GetWifiNetworks,
            Self::SetWifiConfig { .. } => RequestKind::SetWifiConfig,
            Self::RestartReceiver => RequestKind::RestartReceiver,
            Self::RestartNetwork => RequestKind::RestartNetwork,
            Self::Reboot => RequestKind::Reboot,
            Self::SavePendingNetworkSettings => RequestKind::SavePendingNetworkSettings,
            Self::DeletePendingNetworkSettings => RequestKind::DeletePendingNetworkSettings,
        }
    }

    /// Build a request from a validated envelope
    pub fn from_envelope(envelope: &Map<String, Value>) -> Result<Self, RequestError> {
        let kind: RequestKind = match envelope.get("request") {
            None => return Err(RequestError::MissingRequest),
            Some(Value::String(kind)) => kind.parse()?,
            Some(other) => return Err(RequestError::UnsupportedRequest(other.to_string())),
        };
        let payload = envelope.get("request_payload");

        let request = match kind {
            RequestKind::ReadConfig => Self::ReadConfig(settings(payload)?),
            RequestKind::WriteConfig => Self::WriteConfig(write_pairs(
                payload,
                MISSING_PAYLOAD,
                INVALID_WRITE_PAYLOAD,
            )?),
            RequestKind::ReadPendingConfig => Self::ReadPendingConfig(settings(payload)?),
            RequestKind::WritePendingConfig => Self::WritePendingConfig(write_pairs(
                payload,
                MISSING_PAYLOAD,
                INVALID_WRITE_PAYLOAD,
            )?),
            RequestKind::GetDeviceInfo => Self::GetDeviceInfo,
            RequestKind::GetDeviceState => Self::GetDeviceState,
            RequestKind::GetNetworkInfo => Self::GetNetworkInfo,
            RequestKind::GetWifiNetworks => Self::GetWifiNetworks,
            RequestKind::SetWifiConfig => Self::SetWifiConfig {
                pairs: write_pairs(payload, MISSING_WIFI_PAYLOAD, INVALID_WIFI_PAYLOAD)?,
                requestor: envelope
                    .get("requestor")
                    .and_then(Value::as_str)
                    .map(String::from),
            },
            RequestKind::RestartReceiver => Self::RestartReceiver,
            RequestKind::RestartNetwork => Self::RestartNetwork,
            RequestKind::Reboot => Self::Reboot,
            RequestKind::SavePendingNetworkSettings => Self::SavePendingNetworkSettings,
            RequestKind::DeletePendingNetworkSettings => Self::DeletePendingNetworkSettings,
        };

        Ok(request)
    }
}

/// Check the transport level shape of a request: a UTF-8 JSON object sent
/// as JSON.
pub fn validate_envelope(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Map<String, Value>, RequestError> {
    if !content_type.is_some_and(is_json) {
        return Err(RequestError::UnsupportedMediaType);
    }

    let text = std::str::from_utf8(body).map_err(|_| RequestError::BadEncoding)?;

    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(envelope)) => Ok(envelope),
        _ => Err(RequestError::MalformedPayload),
    }
}

/// Full validation from raw body to dispatchable request
pub fn parse_request(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<ConfigRequest, RequestError> {
    let envelope = validate_envelope(content_type, body)?;
    ConfigRequest::from_envelope(&envelope)
}

/// `application/json` or any `application/*+json` type, parameters ignored
fn is_json(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

fn settings(payload: Option<&Value>) -> Result<Vec<String>, RequestError> {
    let payload = payload.ok_or(RequestError::MissingPayload(MISSING_PAYLOAD))?;
    let invalid = || RequestError::InvalidPayload(INVALID_READ_PAYLOAD);

    payload
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|setting| setting.as_str().map(String::from).ok_or_else(invalid))
        .collect()
}

fn write_pairs(
    payload: Option<&Value>,
    missing: &'static str,
    invalid: &'static str,
) -> Result<WritePairs, RequestError> {
    let payload = payload.ok_or(RequestError::MissingPayload(missing))?;
    let object = payload
        .as_object()
        .ok_or(RequestError::InvalidPayload(invalid))?;

    object
        .iter()
        .map(|(key, value)| match value {
            Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                Ok((key.clone(), value.clone()))
            }
            _ => Err(RequestError::InvalidPayload(invalid)),
        })
        .collect()
}
