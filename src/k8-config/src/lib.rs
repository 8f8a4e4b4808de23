mod client_config;
mod config;
mod error;
mod loader;
mod pod;
mod rest;

pub use client_config::ClientConfigLoader;
pub use client_config::ConfigOverrides;
pub use config::*;
pub use error::ConfigError;
pub use loader::LoadingRules;
pub use loader::KUBECONFIG;
pub use pod::PodConfig;
pub use pod::SERVICE_ACCOUNT_DIR;
pub use rest::RestConfig;
pub use rest::TlsConfig;

pub const DEFAULT_NAMESPACE: &str = "default";
