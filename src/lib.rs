// Ratekeeper: request admission control library

pub mod api;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod rate_limit;
pub mod redis;

pub use config::Config;
pub use errors::{AppError, Result};
