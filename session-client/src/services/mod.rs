pub mod auth_api;
pub mod client;
pub mod refresh;
pub mod session;
pub mod token_store;
