//! client-core: Shared infrastructure for sitebook API clients.
pub mod observability;
