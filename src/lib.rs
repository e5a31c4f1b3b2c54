//! Rust client for the GeTui UniPush v2 REST API.

pub mod auth;
pub mod client;
pub mod request_id;
pub mod token_store;
pub mod types;

pub use client::UniPushClient;
pub use request_id::generate_request_id;
pub use token_store::TokenStore;
pub use types::{ApiResponse, CidParam, UniPushConfig, codes};
