//! hwconfd library exports for the binary, integration tests and fuzzing.

pub mod config;
pub mod daemon;
pub mod ipc;
pub mod services;

pub use config::Config;
