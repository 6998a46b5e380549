//! Pending (volatile, uncommitted) network configuration
//!
//! Settings collect in the pending store until they are saved to the
//! persisted configuration or discarded. All operations hold the pending
//! lock for their whole duration.

use crate::{
    config_store::{ConfigStore, PendingConfigStore},
    router::Reply,
    services::config_access::{ConfigAccess, WritePairs, authorize_all, echo, store_value},
};
use log::{debug, error, info};
use serde_json::{Map, Value};

const NO_PENDING_SETTINGS: &str = "No pending settings exist";

pub struct PendingConfigService;

impl PendingConfigService {
    /// Read pending settings, falling back to persisted values for settings
    /// that have nothing pending
    pub async fn read<Config, Pending>(
        access: &ConfigAccess<Config, Pending>,
        settings: &[String],
    ) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
    {
        let _guard = access.lock_pending().await;

        if !access.pending().exists().await {
            return Reply::not_found(NO_PENDING_SETTINGS);
        }

        if let Err(e) = authorize_all(settings.iter(), |key| access.authorize_read(key)) {
            return Reply::failure(e.read_message());
        }

        let mut body = Map::new();
        for key in settings {
            match access.get_pending_config(key).await {
                Ok(value) => {
                    body.insert(key.clone(), Value::String(value));
                }
                Err(e) => return Reply::failure(e.read_message()),
            }
        }

        Reply::success(body)
    }

    /// Stage settings, creating the pending store first if needed
    pub async fn write<Config, Pending>(
        access: &ConfigAccess<Config, Pending>,
        pairs: &WritePairs,
    ) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
    {
        let _guard = access.lock_pending().await;

        if let Err(e) = authorize_all(pairs.iter().map(|(key, _)| key), |key| {
            access.authorize_write(key)
        }) {
            return Reply::failure(e.write_message());
        }

        if let Err(e) = access.pending().create().await {
            error!("failed to create pending network settings: {e:#}");
            return Reply::failure("Server error occurred writing pending network settings");
        }

        for (key, value) in pairs {
            let value = store_value(value);
            if let Err(e) = access.set_pending_config(key, &value).await {
                return Reply::failure(e.write_message());
            }
            debug!("pending {key} staged");
        }

        Reply::success(echo(pairs))
    }

    /// Commit all pending settings to the persisted configuration
    ///
    /// The pending store is removed before the first commit; otherwise the
    /// configuration engine would keep routing writes into it. A commit
    /// failing partway is not rolled back.
    pub async fn save<Config, Pending>(access: &ConfigAccess<Config, Pending>) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
    {
        let _guard = access.lock_pending().await;

        if !access.pending().exists().await {
            return Reply::not_found(NO_PENDING_SETTINGS);
        }

        let entries = match access.pending().entries().await {
            Ok(entries) => entries,
            Err(e) => {
                error!("failed to read pending network settings: {e:#}");
                return Reply::failure("Server error occurred reading pending network settings");
            }
        };

        if let Err(e) = authorize_all(entries.iter().map(|(key, _)| key), |key| {
            access.authorize_write(key)
        }) {
            return Reply::failure(e.write_message());
        }

        if let Err(e) = access.pending().remove().await {
            error!("failed to remove pending network settings: {e:#}");
            return Reply::failure("Server error occurred removing pending network settings");
        }

        for (key, value) in &entries {
            if let Err(e) = access.set_config(key, value).await {
                return Reply::failure(e.write_message());
            }
        }

        info!("saved {} pending network settings", entries.len());
        Reply::success(Map::new())
    }

    /// Discard pending settings. Succeeds when there is nothing to discard.
    pub async fn delete<Config, Pending>(access: &ConfigAccess<Config, Pending>) -> Reply
    where
        Config: ConfigStore,
        Pending: PendingConfigStore,
    {
        let _guard = access.lock_pending().await;

        match access.pending().remove().await {
            Ok(()) => Reply::success(Map::new()),
            Err(e) => {
                error!("failed to remove pending network settings: {e:#}");
                Reply::failure("Server error occurred removing pending network settings")
            }
        }
    }
}
