use actix_cors::Cors;
use actix_server::ServerHandle;
use actix_web::{
    App, HttpServer,
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use piaware_configurator::{
    api::{self, Api},
    config::AppConfig,
    config_store::{PiawareConfigClient, VolatileConfigFile},
    device_client::SysInfoClient,
    router::Configurator,
    services::{config_access::ConfigAccess, device::DeviceFiles, permission::PermissionPolicy},
};
use std::{io::Write, sync::Arc};
use tokio::signal::unix::{SignalKind, signal};

type ConfiguratorApi = Api<PiawareConfigClient, VolatileConfigFile, SysInfoClient>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize();

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let (server_handle, server_task) = run_server()?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    }

    info!("shutting down");
    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("module version: {}", env!("CARGO_PKG_VERSION"));
}

fn create_api() -> Result<ConfiguratorApi> {
    let config = AppConfig::get();

    let policy = PermissionPolicy::load(config.permission_policy_path.as_deref())
        .context("failed to load permission policy")?;

    let access = ConfigAccess::new(
        Arc::new(policy),
        PiawareConfigClient::new(&config.commands),
        VolatileConfigFile::new(&config.paths.pending_config),
    );
    let device = SysInfoClient::new(&config.commands, &config.network, &config.paths);
    let configurator = Configurator::new(
        access,
        device,
        DeviceFiles::from(&config.paths),
        &config.network.ethernet_interface,
    );

    Ok(Api::new(configurator, &config.paths))
}

fn run_server() -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let api = Data::new(create_api()?);
    let server_config = &AppConfig::get().server;

    info!(
        "listening on {}:{}",
        server_config.bind_address, server_config.port
    );

    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_header()
                    .allow_any_method()
                    .max_age(3600),
            )
            .app_data(api.clone())
            .configure(ConfiguratorApi::configure)
            .default_service(web::route().to(api::not_found))
    })
    .bind((server_config.bind_address.as_str(), server_config.port))
    .context("failed to bind server")?
    .disable_signals()
    .run();

    Ok((server.handle(), tokio::spawn(server)))
}
