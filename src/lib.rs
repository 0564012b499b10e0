//! Client for the Panasonic Comfort Cloud service: headless Auth0 login with
//! PKCE, token persistence and refresh, device discovery and status polling,
//! and validated device commands with optimistic local application.

pub mod models {
    pub mod comfortcloud;
}

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod utils;
pub mod services {
    pub mod poller;
    pub mod session;
}
