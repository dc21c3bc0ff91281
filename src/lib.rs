// Public API for integration tests and potential library usage

pub mod api;
pub mod auth;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod questions;
pub mod state;
pub mod store;
pub mod types;
pub mod watcher;
pub mod ws;
