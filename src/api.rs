use crate::{
    config::PathConfig,
    config_store::{ConfigStore, PendingConfigStore},
    device_client::DeviceClient,
    request::parse_request,
    router::{Configurator, Reply},
    services::system_status::SystemStatusService,
};
use actix_files::NamedFile;
use actix_web::{
    Either, HttpRequest, HttpResponse, Responder,
    http::header::{self, ContentType},
    web,
};
use log::{debug, error, info};
use serde_json::json;
use std::path::{Path, PathBuf};

pub struct Api<Config, Pending, Device> {
    pub configurator: Configurator<Config, Pending, Device>,
    pub piaware_status: PathBuf,
    pub flightfeeder_status: PathBuf,
    pub proc_net_dev: PathBuf,
}

impl<Config, Pending, Device> Api<Config, Pending, Device>
where
    Config: ConfigStore + 'static,
    Pending: PendingConfigStore + 'static,
    Device: DeviceClient + 'static,
{
    pub fn new(configurator: Configurator<Config, Pending, Device>, paths: &PathConfig) -> Self {
        Api {
            configurator,
            piaware_status: paths.piaware_status.clone(),
            flightfeeder_status: paths.flightfeeder_status.clone(),
            proc_net_dev: paths.proc_net_dev.clone(),
        }
    }

    /// Register all routes of the configurator
    pub fn configure(cfg: &mut web::ServiceConfig) {
        cfg.route("/configurator", web::post().to(Self::configurator))
            .route("/configurator/", web::post().to(Self::configurator))
            .route("/system/status", web::get().to(Self::system_status))
            .route("/piaware/status", web::get().to(Self::piaware_status))
            .route("/flightfeeder/status", web::get().to(Self::flightfeeder_status));
    }

    pub async fn configurator(
        req: HttpRequest,
        body: web::Bytes,
        api: web::Data<Self>,
    ) -> impl Responder {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());

        let reply = match parse_request(content_type, &body) {
            Ok(request) => {
                info!("incoming request: {}", request.kind());
                debug!("{request:?}");
                api.configurator.dispatch(request).await
            }
            Err(e) => {
                error!("rejected request: {e:?}");
                Reply::from(e)
            }
        };

        debug!("response: {} {:?}", reply.status, reply.body);
        reply.into_response()
    }

    pub async fn system_status(api: web::Data<Self>) -> impl Responder {
        debug!("system_status() called");
        HttpResponse::Ok().json(SystemStatusService::status(&api.proc_net_dev).await)
    }

    pub async fn piaware_status(api: web::Data<Self>) -> impl Responder {
        debug!("piaware_status() called");
        status_document(&api.piaware_status, "Could not read PiAware status.json").await
    }

    pub async fn flightfeeder_status(api: web::Data<Self>) -> impl Responder {
        debug!("flightfeeder_status() called");
        status_document(
            &api.flightfeeder_status,
            "Could not read FlightFeeder status.json",
        )
        .await
    }
}

pub async fn not_found() -> impl Responder {
    HttpResponse::NotFound().json(json!({"error": "Resource not found"}))
}

async fn status_document(path: &Path, error: &str) -> Either<NamedFile, HttpResponse> {
    match NamedFile::open_async(path).await {
        Ok(file) => Either::Left(file.set_content_type(ContentType::json().0)),
        Err(e) => {
            debug!("cannot serve {path:?}: {e}");
            Either::Right(HttpResponse::NotFound().json(json!({ "error": error })))
        }
    }
}
