#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod gateway;
pub mod hub;
pub mod models;
pub mod status;
pub mod supervisor;
pub mod wire;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
