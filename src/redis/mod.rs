pub mod client;
pub mod counters;

pub use client::{connect, health_check, open_client};
pub use counters::RedisCounterStore;
