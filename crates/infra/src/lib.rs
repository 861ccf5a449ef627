//! Infrastructure layer: queue broker, job pipeline, push gateway, mail
//! delivery, entity store and configuration.

pub mod config;
pub mod entity_store;
pub mod jobs;
pub mod mail;
pub mod push;

pub use config::{AppConfig, ConfigError};
