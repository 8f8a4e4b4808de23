use std::io::Error as IoError;
use std::path::PathBuf;

use base64::DecodeError;
use serde_yaml::Error as SerdeYamlError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] IoError),
    #[error("Yaml error: {0}")]
    SerdeError(#[from] SerdeYamlError),
    #[error("Base64 error: {0}")]
    Base64Error(#[from] DecodeError),
    #[error("kubeconfig {path:?} could not be read: {source}")]
    KubeConfigRead { path: PathBuf, source: IoError },
    #[error("context was not found for specified context: {0}")]
    ContextNotFound(String),
    #[error("cluster was not found for specified cluster: {0}")]
    ClusterNotFound(String),
    #[error("auth info was not found for specified user: {0}")]
    UserNotFound(String),
    #[error("invalid configuration: no configuration has been provided")]
    NoConfiguration,
    #[error("invalid configuration: {}", .0.join(", "))]
    Invalid(Vec<String>),
    #[error("Unknown error: {0}")]
    Other(String),
}

impl ConfigError {
    /// true when nothing was configured at all, as opposed to a broken configuration
    pub fn is_empty_config(&self) -> bool {
        matches!(self, Self::NoConfiguration)
    }
}
