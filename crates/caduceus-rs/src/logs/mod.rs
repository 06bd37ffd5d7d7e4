//! Logging configuration.

pub mod logger;

pub use logger::configure_logger;
