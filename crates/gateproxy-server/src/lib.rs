pub mod cli;
pub mod config;
pub mod cors;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod pipeline;
pub mod proxy;
pub mod server;

pub use config::{AppConfig, AuthConfig, CacheConfig, CredentialSource, FailurePolicy};
pub use error::GatewayError;
pub use observability::init_tracing_with;
pub use server::{AppState, GatewayServer, GatewayState, ServerBuilder, build_app};
