pub mod api;
pub mod command;
pub mod config;
pub mod config_store;
pub mod device_client;
pub mod request;
pub mod router;
pub mod services;
