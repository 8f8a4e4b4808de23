use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretSlice;
use secrecy::SecretString;

use crate::AuthProviderDetail;
use crate::Exec;

/// TLS settings of a resolved configuration
#[derive(Debug, Default)]
pub struct TlsConfig {
    pub insecure: bool,
    pub server_name: Option<String>,
    pub ca_file: Option<PathBuf>,
    pub ca_data: Option<Vec<u8>>,
    pub cert_file: Option<PathBuf>,
    pub cert_data: Option<Vec<u8>>,
    pub key_file: Option<PathBuf>,
    pub key_data: Option<SecretSlice<u8>>,
}

/// Everything needed to talk to an api server, after kubeconfig
/// files, context selection and command line overrides were applied.
#[derive(Debug, Default)]
pub struct RestConfig {
    pub host: String,
    pub tls: TlsConfig,
    pub bearer_token: Option<SecretString>,
    pub bearer_token_file: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub exec: Option<Exec>,
    pub auth_provider: Option<AuthProviderDetail>,
    pub impersonate: Option<String>,
    pub impersonate_groups: Vec<String>,
    pub proxy_url: Option<String>,
    pub timeout: Option<Duration>,
    pub disable_compression: bool,
}

impl RestConfig {
    pub fn has_ca(&self) -> bool {
        self.tls.ca_data.is_some() || self.tls.ca_file.is_some()
    }

    pub fn has_cert_auth(&self) -> bool {
        (self.tls.cert_data.is_some() || self.tls.cert_file.is_some())
            && (self.tls.key_data.is_some() || self.tls.key_file.is_some())
    }

    pub fn has_token_auth(&self) -> bool {
        self.bearer_token.is_some() || self.bearer_token_file.is_some()
    }

    pub fn has_basic_auth(&self) -> bool {
        self.username.is_some()
    }
}
