use std::env;
use std::fs::read_to_string;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";
const SERVICE_HOST: &str = "KUBERNETES_SERVICE_HOST";
const SERVICE_PORT: &str = "KUBERNETES_SERVICE_PORT";
const POD_NAMESPACE: &str = "POD_NAMESPACE";

/// Configuration available to a process running inside a pod.
///
/// The service account token is not read here, the transport reads
/// `token_path()` on every request so rotated tokens are picked up.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct PodConfig {
    pub service_host: String,
    pub service_port: String,
    pub namespace: String,
    pub account_dir: PathBuf,
}

impl PodConfig {
    /// true when the service environment and service account token are present
    pub fn possible() -> bool {
        Self::possible_in(Path::new(SERVICE_ACCOUNT_DIR))
    }

    pub fn possible_in(account_dir: &Path) -> bool {
        env::var(SERVICE_HOST).is_ok()
            && env::var(SERVICE_PORT).is_ok()
            && account_dir.join("token").exists()
    }

    /// load from the pod environment, None if not running inside a pod
    pub fn load() -> Option<Self> {
        Self::load_from(Path::new(SERVICE_ACCOUNT_DIR))
    }

    pub fn load_from(account_dir: &Path) -> Option<Self> {
        let service_host = env::var(SERVICE_HOST).ok()?;
        let service_port = env::var(SERVICE_PORT).ok()?;

        let token_path = account_dir.join("token");
        if !token_path.exists() {
            debug!(path = %token_path.display(), "no service account token");
            return None;
        }

        Some(Self {
            service_host,
            service_port,
            namespace: Self::namespace_in(account_dir),
            account_dir: account_dir.to_owned(),
        })
    }

    /// namespace of the pod, `POD_NAMESPACE` wins over the service account file
    pub fn namespace() -> String {
        Self::namespace_in(Path::new(SERVICE_ACCOUNT_DIR))
    }

    pub fn namespace_in(account_dir: &Path) -> String {
        if let Ok(ns) = env::var(POD_NAMESPACE) {
            if !ns.is_empty() {
                return ns;
            }
        }

        match read_to_string(account_dir.join("namespace")) {
            Ok(ns) if !ns.trim().is_empty() => ns.trim().to_owned(),
            _ => crate::DEFAULT_NAMESPACE.to_owned(),
        }
    }

    pub fn token_path(&self) -> PathBuf {
        self.account_dir.join("token")
    }

    pub fn ca_path(&self) -> PathBuf {
        self.account_dir.join("ca.crt")
    }

    /// api server address, ipv6 hosts are bracketed
    pub fn api_path(&self) -> String {
        if self.service_host.contains(':') {
            format!("https://[{}]:{}", self.service_host, self.service_port)
        } else {
            format!("https://{}:{}", self.service_host, self.service_port)
        }
    }
}
