pub mod config;
pub mod credential;
pub mod error;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod panels;
pub mod session;
pub mod stream;
pub mod telemetry;
