//! Kubernetes api clients configured the way `kubectl` is: kubeconfig files,
//! `KUBECONFIG`, and the standard command line flags.

mod auth;
mod client;
mod error;
mod factory;
mod flags;
mod server_url;
mod transport;

pub use self::client::Client;
pub use self::client::HttpClient;
pub use self::client::VersionInfo;
pub use self::error::ClientError;
pub use self::factory::build_client;
pub use self::factory::ClientFactory;
pub use self::flags::parse_timeout;
pub use self::flags::ConfigFlags;
pub use self::flags::Flag;
pub use self::server_url::default_server_url;
pub use self::server_url::default_versioned_api_path;
pub use self::server_url::endpoint_string;
pub use self::server_url::is_config_transport_tls;
pub use self::server_url::GroupVersion;
pub use self::transport::transport_for;

pub use k8_config;

pub mod http {
    pub use isahc::http::*;
}
