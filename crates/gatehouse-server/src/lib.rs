//! # gatehouse-server
//!
//! HTTP server wiring for Gatehouse: configuration loading, tracing setup,
//! identity directory selection and router assembly around
//! [`gatehouse_auth::login_router`].

pub mod config;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoggingConfig, ServerConfig, StorageBackend, StorageConfig};
pub use observability::init_tracing;
pub use server::{
    GatehouseServer, ServerBuilder, build_app, build_app_with_directory, connect_directory,
};
