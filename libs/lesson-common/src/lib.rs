pub mod config;
pub mod redis;
pub mod runners;
pub mod types;
