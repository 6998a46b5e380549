use crate::{
    config_store::{ConfigStore, PendingConfigStore},
    device_client::DeviceClient,
    request::{ConfigRequest, RequestError},
    services::{
        config_access::{ConfigAccess, ConfigService},
        device::{DeviceFiles, DeviceService},
        pending::PendingConfigService,
        wifi::WifiService,
    },
};
use actix_web::{HttpResponse, http::StatusCode};
use serde_json::{Map, Value};

/// Status and JSON body produced by a handler
#[derive(Clone, Debug, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Map<String, Value>,
}

impl Reply {
    /// 200 with the body as is
    pub fn ok(body: Map<String, Value>) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    /// 200 with `success: true` appended
    pub fn success(mut body: Map<String, Value>) -> Self {
        body.insert("success".to_string(), Value::Bool(true));
        Self::ok(body)
    }

    /// Business failure, reported with 200
    pub fn failure(error: impl Into<String>) -> Self {
        Self::error(StatusCode::OK, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::error(StatusCode::NOT_FOUND, error)
    }

    fn error(status: StatusCode, error: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(false));
        body.insert("error".to_string(), Value::String(error.into()));
        Self { status, body }
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse::build(self.status).json(self.body)
    }
}

impl From<RequestError> for Reply {
    fn from(e: RequestError) -> Self {
        Self::error(e.status_code(), e.to_string())
    }
}

/// Routes validated requests to their handlers
pub struct Configurator<Config, Pending, Device> {
    access: ConfigAccess<Config, Pending>,
    device: Device,
    files: DeviceFiles,
    ethernet_interface: String,
}

impl<Config, Pending, Device> Configurator<Config, Pending, Device>
where
    Config: ConfigStore,
    Pending: PendingConfigStore,
    Device: DeviceClient,
{
    pub fn new(
        access: ConfigAccess<Config, Pending>,
        device: Device,
        files: DeviceFiles,
        ethernet_interface: impl Into<String>,
    ) -> Self {
        Self {
            access,
            device,
            files,
            ethernet_interface: ethernet_interface.into(),
        }
    }

    pub async fn dispatch(&self, request: ConfigRequest) -> Reply {
        let access = &self.access;
        let device = &self.device;

        match request {
            ConfigRequest::ReadConfig(settings) => ConfigService::read(access, &settings).await,
            ConfigRequest::WriteConfig(pairs) => ConfigService::write(access, &pairs).await,
            ConfigRequest::ReadPendingConfig(settings) => {
                PendingConfigService::read(access, &settings).await
            }
            ConfigRequest::WritePendingConfig(pairs) => {
                PendingConfigService::write(access, &pairs).await
            }
            ConfigRequest::GetDeviceInfo => DeviceService::info(access).await,
            ConfigRequest::GetDeviceState => DeviceService::state(access, device, &self.files).await,
            ConfigRequest::GetNetworkInfo => {
                DeviceService::network_info(access, device, &self.ethernet_interface).await
            }
            ConfigRequest::GetWifiNetworks => WifiService::networks(device).await,
            ConfigRequest::SetWifiConfig { pairs, requestor } => {
                WifiService::set_config(access, device, &pairs, requestor.as_deref()).await
            }
            ConfigRequest::RestartReceiver => DeviceService::restart_receiver(device).await,
            ConfigRequest::RestartNetwork => DeviceService::restart_network(device).await,
            ConfigRequest::Reboot => DeviceService::reboot(device).await,
            ConfigRequest::SavePendingNetworkSettings => PendingConfigService::save(access).await,
            ConfigRequest::DeletePendingNetworkSettings => {
                PendingConfigService::delete(access).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::permission::PermissionPolicy;
    use mockall_double::double;
    use serde_json::json;
    use std::{path::PathBuf, sync::Arc};

    #[double]
    use crate::config_store::ConfigStore;
    #[double]
    use crate::config_store::PendingConfigStore;
    #[double]
    use crate::device_client::DeviceClient;

    fn configurator(
        config: ConfigStore,
        pending: PendingConfigStore,
        device: DeviceClient,
    ) -> Configurator<ConfigStore, PendingConfigStore, DeviceClient> {
        let missing = PathBuf::from("/nonexistent/piaware-configurator");
        Configurator::new(
            ConfigAccess::new(Arc::new(PermissionPolicy::default()), config, pending),
            device,
            DeviceFiles {
                feeder_id: missing.join("feeder_id"),
                device_location: missing.join("location"),
                piaware_status: missing.join("piaware.json"),
                flightfeeder_status: missing.join("flightfeeder.json"),
            },
            "eth0",
        )
    }

    mod reply {
        use super::*;

        #[test]
        fn success_appends_flag_last() {
            let mut body = Map::new();
            body.insert("rtlsdr-gain".to_string(), json!("20"));

            let reply = Reply::success(body);

            assert_eq!(reply.status, StatusCode::OK);
            assert_eq!(
                serde_json::to_string(&reply.body).expect("should serialize"),
                r#"{"rtlsdr-gain":"20","success":true}"#
            );
        }

        #[test]
        fn request_errors_keep_status() {
            let reply = Reply::from(RequestError::UnsupportedMediaType);
            assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
            assert_eq!(
                Value::Object(reply.body),
                json!({"success": false, "error": "content-type must be application/json"})
            );

            let reply = Reply::from(RequestError::MissingRequest);
            assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        }
    }

    mod dispatch {
        use super::*;

        #[tokio::test]
        async fn read_request_reaches_config_store() {
            let mut config_mock = ConfigStore::default();
            config_mock
                .expect_read()
                .withf(|key| key == "rtlsdr-gain")
                .times(1)
                .returning(|_| Box::pin(async { Ok("20".to_string()) }));

            let reply = configurator(
                config_mock,
                PendingConfigStore::default(),
                DeviceClient::default(),
            )
            .dispatch(ConfigRequest::ReadConfig(vec!["rtlsdr-gain".to_string()]))
            .await;

            assert_eq!(
                Value::Object(reply.body),
                json!({"rtlsdr-gain": "20", "success": true})
            );
        }

        #[tokio::test]
        async fn reboot_reaches_device() {
            let mut device_mock = DeviceClient::default();
            device_mock
                .expect_reboot()
                .times(1)
                .returning(|| Box::pin(async { Ok(()) }));

            let reply = configurator(
                ConfigStore::default(),
                PendingConfigStore::default(),
                device_mock,
            )
            .dispatch(ConfigRequest::Reboot)
            .await;

            assert_eq!(Value::Object(reply.body), json!({"success": true}));
        }

        #[tokio::test]
        async fn delete_pending_reaches_pending_store() {
            let mut pending_mock = PendingConfigStore::default();
            pending_mock
                .expect_remove()
                .times(1)
                .returning(|| Box::pin(async { Ok(()) }));

            let reply = configurator(
                ConfigStore::default(),
                pending_mock,
                DeviceClient::default(),
            )
            .dispatch(ConfigRequest::DeletePendingNetworkSettings)
            .await;

            assert_eq!(reply.status, StatusCode::OK);
        }
    }
}
