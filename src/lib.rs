pub mod auth;
pub mod config;
pub mod copy;
pub mod engine;
pub mod protocol;
pub mod server;
pub mod wire;
