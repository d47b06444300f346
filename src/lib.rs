#![allow(clippy::result_large_err)]

pub mod archive;
pub mod artifacts;
pub mod config;
pub mod consumer;
pub mod definitions;
pub mod dump;
pub mod engines;
pub mod error;
pub mod finding;
pub mod model;
pub mod notify;
pub mod period;
pub mod registry;
pub mod status;
pub mod status_store;
pub mod submission;
pub mod telemetry;

pub use error::{Error, Result};
