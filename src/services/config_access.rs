//! Permission-gated access to persisted and pending configuration
//!
//! Every configuration read or write goes through [`ConfigAccess`], which
//! rejects non-ASCII keys, consults the [`PermissionPolicy`] and wraps store
//! failures with the offending key.

use crate::{
    config_store::{ConfigStore, PendingConfigStore},
    router::Reply,
    services::permission::PermissionPolicy,
};
use log::{debug, error, info};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

/// Business failure of a single configuration access
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("setting is not an ASCII string: {0:?}")]
    NotAsciiKey(String),
    #[error("permission denied for {0}")]
    PermissionDenied(String),
    #[error("failed to access {key}: {cause:#}")]
    Store { key: String, cause: anyhow::Error },
}

impl ConfigError {
    pub fn key(&self) -> &str {
        match self {
            Self::NotAsciiKey(key) | Self::PermissionDenied(key) | Self::Store { key, .. } => key,
        }
    }

    /// Client facing message for a failed read
    pub fn read_message(&self) -> String {
        match self {
            Self::NotAsciiKey(_) => "Badly formatted setting".to_string(),
            Self::PermissionDenied(key) => format!("Reading {key} is not allowed"),
            Self::Store { key, .. } => {
                format!("Server error occurred reading config setting: {key}")
            }
        }
    }

    /// Client facing message for a failed write
    pub fn write_message(&self) -> String {
        match self {
            Self::NotAsciiKey(_) => "Badly formatted setting".to_string(),
            Self::PermissionDenied(key) => format!("Setting {key} is not allowed"),
            Self::Store { key, .. } => {
                format!("Server error occurred writing config setting: {key}")
            }
        }
    }
}

/// Ordered `setting -> value` pairs of a write request
///
/// Values are JSON scalars; the store receives their string form.
pub type WritePairs = Vec<(String, Value)>;

/// String form of a scalar setting value as handed to the stores
pub fn store_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub struct ConfigAccess<Config, Pending> {
    policy: Arc<PermissionPolicy>,
    config: Config,
    pending: Pending,
    pending_lock: Mutex<()>,
}

impl<Config, Pending> ConfigAccess<Config, Pending>
where
    Config: ConfigStore,
    Pending: PendingConfigStore,
{
    pub fn new(policy: Arc<PermissionPolicy>, config: Config, pending: Pending) -> Self {
        Self {
            policy,
            config,
            pending,
            pending_lock: Mutex::new(()),
        }
    }

    pub fn authorize_read(&self, key: &str) -> Result<(), ConfigError> {
        ensure_ascii(key)?;
        if !self.policy.can_read(key) {
            error!("invalid permissions to read {key}");
            return Err(ConfigError::PermissionDenied(key.to_string()));
        }
        Ok(())
    }

    pub fn authorize_write(&self, key: &str) -> Result<(), ConfigError> {
        ensure_ascii(key)?;
        if !self.policy.can_write(key) {
            error!("invalid permissions to write {key}");
            return Err(ConfigError::PermissionDenied(key.to_string()));
        }
        Ok(())
    }

    pub async fn get_config(&self, key: &str) -> Result<String, ConfigError> {
        self.authorize_read(key)?;
        self.config
            .read(key)
            .await
            .map_err(|cause| store_error(key, cause))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.authorize_write(key)?;
        self.config
            .write(key, value)
            .await
            .map_err(|cause| store_error(key, cause))
    }

    /// Pending value of `key`, or its persisted value if nothing is pending
    pub async fn get_pending_config(&self, key: &str) -> Result<String, ConfigError> {
        self.authorize_read(key)?;
        match self.pending.read(key).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => self
                .config
                .read(key)
                .await
                .map_err(|cause| store_error(key, cause)),
            Err(cause) => Err(store_error(key, cause)),
        }
    }

    pub async fn set_pending_config(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.authorize_write(key)?;
        self.pending
            .write(key, value)
            .await
            .map_err(|cause| store_error(key, cause))
    }

    /// Serializes pending store operations. Hold the guard for the whole
    /// check-then-act sequence.
    pub async fn lock_pending(&self) -> MutexGuard<'_, ()> {
        self.pending_lock.lock().await
    }

    pub fn pending(&self) -> &Pending {
        &self.pending
    }
}

fn ensure_ascii(key: &str) -> Result<(), ConfigError> {
    if key.is_ascii() {
        Ok(())
    } else {
        error!("not a valid ASCII string: {key:?}");
        Err(ConfigError::NotAsciiKey(key.to_string()))
    }
}

fn store_error(key: &str, cause: anyhow::Error) -> ConfigError {
    error!("error accessing {key}, make sure it is a valid piaware-config option: {cause:#}");
    ConfigError::Store {
        key: key.to_string(),
        cause,
    }
}

/// Reads and writes of persisted configuration
pub struct ConfigService;

impl ConfigService {
    /// Read `settings` in request order. Every setting is authorized before
    /// the store is consulted.
    pub async fn read<Config, Pending>(
        access: &ConfigAccess<Config, Pending>,
        settings: &[String],
    ) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
    {
        if let Err(e) = authorize_all(settings.iter(), |key| access.authorize_read(key)) {
            return Reply::failure(e.read_message());
        }

        let mut body = Map::new();
        for key in settings {
            match access.get_config(key).await {
                Ok(value) => {
                    body.insert(key.clone(), Value::String(value));
                }
                Err(e) => return Reply::failure(e.read_message()),
            }
        }

        Reply::success(body)
    }

    /// Write `pairs` in request order and echo them back
    pub async fn write<Config, Pending>(
        access: &ConfigAccess<Config, Pending>,
        pairs: &WritePairs,
    ) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
    {
        match write_all(access, pairs).await {
            Ok(()) => Reply::success(echo(pairs)),
            Err(e) => Reply::failure(e.write_message()),
        }
    }
}

/// Authorize and write every pair to the persisted store
///
/// Authorization happens for all pairs before the first write, so a denied
/// setting leaves the store untouched. A store failure partway through is
/// not rolled back.
pub async fn write_all<Config, Pending>(
    access: &ConfigAccess<Config, Pending>,
    pairs: &WritePairs,
) -> Result<(), ConfigError>
where
    Config: ConfigStore,
    Pending: PendingConfigStore,
{
    authorize_all(pairs.iter().map(|(key, _)| key), |key| {
        access.authorize_write(key)
    })?;

    for (key, value) in pairs {
        let value = store_value(value);
        access.set_config(key, &value).await?;
        info!("set {key}");
        debug!("{key} = {value}");
    }

    Ok(())
}

pub fn authorize_all<'a>(
    keys: impl Iterator<Item = &'a String>,
    authorize: impl Fn(&str) -> Result<(), ConfigError>,
) -> Result<(), ConfigError> {
    keys.map(|key| authorize(key)).collect()
}

pub fn echo(pairs: &WritePairs) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;
    use anyhow::anyhow;
    use mockall::Sequence;
    use mockall_double::double;
    use serde_json::json;

    #[double]
    use crate::config_store::ConfigStore;
    #[double]
    use crate::config_store::PendingConfigStore;

    fn access(
        config: ConfigStore,
        pending: PendingConfigStore,
    ) -> ConfigAccess<ConfigStore, PendingConfigStore> {
        ConfigAccess::new(Arc::new(PermissionPolicy::default()), config, pending)
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    fn pairs(value: Value) -> WritePairs {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("pairs must be an object"),
        }
    }

    mod choke_point {
        use super::*;

        #[tokio::test]
        async fn non_ascii_key_is_rejected_before_lookup() {
            let config_mock = ConfigStore::default();
            let access = access(config_mock, PendingConfigStore::default());

            let result = access.get_config("wireless-ssïd").await;

            assert!(matches!(result, Err(ConfigError::NotAsciiKey(_))));
            assert_eq!(
                result.unwrap_err().read_message(),
                "Badly formatted setting"
            );
        }

        #[tokio::test]
        async fn write_only_setting_cannot_be_read() {
            let access = access(ConfigStore::default(), PendingConfigStore::default());

            let result = access.get_config("wireless-password").await;

            assert_eq!(
                result.unwrap_err().read_message(),
                "Reading wireless-password is not allowed"
            );
        }

        #[tokio::test]
        async fn read_only_setting_cannot_be_written() {
            let access = access(ConfigStore::default(), PendingConfigStore::default());

            let result = access.set_config("image-type", "flightfeeder").await;

            assert_eq!(
                result.unwrap_err().write_message(),
                "Setting image-type is not allowed"
            );
        }

        #[tokio::test]
        async fn store_failure_is_wrapped_with_key() {
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_read()
                .returning(|_| Box::pin(async { Err(anyhow!("piawareConfig failed")) }));
            let access = access(config_mock, PendingConfigStore::default());

            let result = access.get_config("rtlsdr-gain").await;

            assert_eq!(
                result.unwrap_err().read_message(),
                "Server error occurred reading config setting: rtlsdr-gain"
            );
        }

        #[tokio::test]
        async fn pending_value_overlays_persisted_value() {
            let mut pending_mock = PendingConfigStore::default();
            pending_mock
                .expect_read()
                .withf(|key| key == "wireless-ssid")
                .returning(|_| Box::pin(async { Ok(Some("pending".to_string())) }));
            let access = access(ConfigStore::default(), pending_mock);

            assert_eq!(
                access
                    .get_pending_config("wireless-ssid")
                    .await
                    .expect("should read"),
                "pending"
            );
        }

        #[tokio::test]
        async fn missing_pending_value_falls_through_to_store() {
            let mut pending_mock = PendingConfigStore::default();
            pending_mock
                .expect_read()
                .returning(|_| Box::pin(async { Ok(None) }));
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_read()
                .withf(|key| key == "wired-type")
                .returning(|_| Box::pin(async { Ok("dhcp".to_string()) }));
            let access = access(config_mock, pending_mock);

            assert_eq!(
                access
                    .get_pending_config("wired-type")
                    .await
                    .expect("should read"),
                "dhcp"
            );
        }
    }

    mod read {
        use super::*;

        #[tokio::test]
        async fn returns_values_in_request_order() {
            let mut config_mock = ConfigStore::default();
            config_mock.expect_read().returning(|key| {
                let value = match key {
                    "wireless-ssid" => "MyNetwork",
                    _ => "20",
                };
                Box::pin(async move { Ok(value.to_string()) })
            });
            let access = access(config_mock, PendingConfigStore::default());

            let reply =
                ConfigService::read(&access, &keys(&["wireless-ssid", "rtlsdr-gain"])).await;

            assert_eq!(reply.status, StatusCode::OK);
            assert_eq!(
                Value::Object(reply.body),
                json!({"wireless-ssid": "MyNetwork", "rtlsdr-gain": "20", "success": true})
            );
        }

        #[tokio::test]
        async fn denied_setting_aborts_without_touching_store() {
            let mut config_mock = ConfigStore::default();
            config_mock.expect_read().never();
            let access = access(config_mock, PendingConfigStore::default());

            let reply =
                ConfigService::read(&access, &keys(&["rtlsdr-gain", "wireless-password"])).await;

            assert_eq!(reply.status, StatusCode::OK);
            assert_eq!(
                Value::Object(reply.body),
                json!({"success": false, "error": "Reading wireless-password is not allowed"})
            );
        }

        #[tokio::test]
        async fn empty_list_succeeds() {
            let access = access(ConfigStore::default(), PendingConfigStore::default());

            let reply = ConfigService::read(&access, &[]).await;

            assert_eq!(Value::Object(reply.body), json!({"success": true}));
        }

        #[tokio::test]
        async fn store_failure_reports_setting() {
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_read()
                .returning(|_| Box::pin(async { Err(anyhow!("no such option")) }));
            let access = access(config_mock, PendingConfigStore::default());

            let reply = ConfigService::read(&access, &keys(&["uat-sdr-gain"])).await;

            assert_eq!(
                reply.body["error"],
                "Server error occurred reading config setting: uat-sdr-gain"
            );
        }
    }

    mod write {
        use super::*;

        #[tokio::test]
        async fn writes_string_form_and_echoes_values() {
            let mut seq = Sequence::new();
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_write()
                .withf(|key, value| key == "rtlsdr-gain" && value == "20")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Box::pin(async { Ok(()) }));
            config_mock
                .expect_write()
                .withf(|key, value| key == "wireless-network" && value == "no")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Box::pin(async { Ok(()) }));
            let access = access(config_mock, PendingConfigStore::default());

            let reply = ConfigService::write(
                &access,
                &pairs(json!({"rtlsdr-gain": 20, "wireless-network": "no"})),
            )
            .await;

            assert_eq!(
                Value::Object(reply.body),
                json!({"rtlsdr-gain": 20, "wireless-network": "no", "success": true})
            );
        }

        #[tokio::test]
        async fn denied_setting_prevents_all_writes() {
            let mut config_mock = ConfigStore::default();
            config_mock.expect_write().never();
            let access = access(config_mock, PendingConfigStore::default());

            let reply = ConfigService::write(
                &access,
                &pairs(json!({"rtlsdr-gain": 20, "uat-sdr-gain": 30})),
            )
            .await;

            assert_eq!(
                Value::Object(reply.body),
                json!({"success": false, "error": "Setting uat-sdr-gain is not allowed"})
            );
        }

        #[tokio::test]
        async fn store_failure_stops_later_writes() {
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_write()
                .withf(|key, _| key == "rtlsdr-gain")
                .times(1)
                .returning(|_, _| Box::pin(async { Err(anyhow!("write_config failed")) }));
            let access = access(config_mock, PendingConfigStore::default());

            let reply = ConfigService::write(
                &access,
                &pairs(json!({"rtlsdr-gain": 20, "wireless-ssid": "home"})),
            )
            .await;

            assert_eq!(
                reply.body["error"],
                "Server error occurred writing config setting: rtlsdr-gain"
            );
        }
    }

    #[test]
    fn store_value_stringifies_scalars() {
        assert_eq!(store_value(&json!("yes")), "yes");
        assert_eq!(store_value(&json!(-10)), "-10");
        assert_eq!(store_value(&json!(49.6)), "49.6");
        assert_eq!(store_value(&json!(true)), "true");
    }
}
