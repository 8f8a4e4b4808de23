use std::fmt;
use std::path::Path;
use std::sync::Arc;

use isahc::Body;
use isahc::ReadResponseExt;
use serde::Deserialize;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;
use tracing::trace;

use crate::auth::Credential;
use crate::http::header::HeaderMap;
use crate::http::header::HeaderValue;
use crate::http::header::ACCEPT;
use crate::http::header::AUTHORIZATION;
use crate::http::Request;
use crate::http::Response;
use crate::ClientError;

#[derive(Deserialize, Serialize, Debug, Eq, PartialEq, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionInfo {
    pub major: String,
    pub minor: String,
    pub git_version: String,
    pub git_commit: String,
    pub git_tree_state: String,
    pub build_date: String,
    pub go_version: String,
    pub compiler: String,
    pub platform: String,
}

/// HTTP client bound to one api server's TLS settings and credentials.
///
/// Cloning is cheap, clones share the credential cache.
#[derive(Clone)]
pub struct HttpClient {
    inner: isahc::HttpClient,
    credential: Option<Arc<Credential>>,
    extra_headers: HeaderMap,
    tls: bool,
    ca_file: Option<Arc<NamedTempFile>>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("credential", &self.credential_kind())
            .field("tls", &self.tls)
            .finish()
    }
}

impl HttpClient {
    pub(crate) fn new(
        inner: isahc::HttpClient,
        credential: Option<Arc<Credential>>,
        extra_headers: HeaderMap,
        tls: bool,
        ca_file: Option<Arc<NamedTempFile>>,
    ) -> Self {
        Self {
            inner,
            credential,
            extra_headers,
            tls,
            ca_file,
        }
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn credential_kind(&self) -> Option<&'static str> {
        self.credential.as_ref().map(|c| c.kind())
    }

    /// temporary file holding inline CA data
    pub fn ca_file(&self) -> Option<&Path> {
        self.ca_file.as_ref().map(|file| file.path())
    }

    pub fn inner(&self) -> &isahc::HttpClient {
        &self.inner
    }

    fn finish_request<B>(&self, request: &mut Request<B>) -> Result<(), ClientError> {
        let headers = request.headers_mut();
        if let Some(credential) = &self.credential {
            headers.insert(AUTHORIZATION, credential.header()?);
        }
        for (name, value) in &self.extra_headers {
            headers.append(name, value.clone());
        }
        Ok(())
    }

    /// send a request with credentials and impersonation headers attached
    pub fn send<B: Into<Body>>(
        &self,
        mut request: Request<B>,
    ) -> Result<Response<Body>, ClientError> {
        self.finish_request(&mut request)?;
        trace!(method = %request.method(), uri = %request.uri(), "sending request");
        Ok(self.inner.send(request)?)
    }
}

/// Connection to a Kubernetes api server
#[derive(Debug, Clone)]
pub struct Client {
    pub endpoint: String,
    pub namespace: String,
    pub client: HttpClient,
}

impl Client {
    /// GET request for `path` relative to the endpoint
    pub fn request(&self, path: &str) -> Result<Request<()>, ClientError> {
        let uri = format!("{}/{}", self.endpoint, path.trim_start_matches('/'));
        Ok(Request::get(uri)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .body(())?)
    }

    pub fn server_version(&self) -> Result<VersionInfo, ClientError> {
        let request = self.request("/version")?;
        debug!(uri = %request.uri(), "retrieving server version");
        let mut response = self.client.send(request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Client(status));
        }
        let text = response.text()?;
        trace!(%text, "version response");
        Ok(serde_json::from_str(&text)?)
    }
}
