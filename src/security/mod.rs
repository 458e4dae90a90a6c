pub mod config;
pub mod context;
pub mod cookies;
pub mod rate_limit;
pub mod resolver;
