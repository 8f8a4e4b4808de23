use std::io::Error as IoError;

use thiserror::Error;

use k8_config::ConfigError;

use crate::http::header::InvalidHeaderValue;
use crate::http::status::StatusCode;
use crate::http::uri::InvalidUri;
use crate::http::Error as HttpError;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    K8ConfigError(#[from] ConfigError),
    #[error("IO error: {0}")]
    IoError(#[from] IoError),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("host must be a URL or a host:port pair: {0:?}")]
    InvalidServerUrl(String),
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] InvalidUri),
    #[error("http error: {0}")]
    HttpError(#[from] HttpError),
    #[error("invalid header: {0}")]
    InvalidHttpHeader(#[from] InvalidHeaderValue),
    #[error("transport error: {0}")]
    Transport(#[from] isahc::Error),
    #[error("TLS config error: {0}")]
    Tls(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("client error: {0}")]
    Client(StatusCode),
}

impl From<StatusCode> for ClientError {
    fn from(code: StatusCode) -> Self {
        Self::Client(code)
    }
}
