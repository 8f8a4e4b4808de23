use url::Url;

use k8_config::RestConfig;

use crate::ClientError;

/// api group and version, empty group is the core api
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }
}

/// Canonical server url for `host` together with the versioned api path.
///
/// A host without scheme is treated as `host:port` and gets `https://` when
/// `default_tls` is set, `http://` otherwise. Hosts carrying a path are rejected.
pub fn default_server_url(
    host: &str,
    api_path: &str,
    group_version: &GroupVersion,
    default_tls: bool,
) -> Result<(Url, String), ClientError> {
    if host.is_empty() {
        return Err(ClientError::InvalidServerUrl(host.to_owned()));
    }

    let url = match Url::parse(host) {
        Ok(url) if url.host_str().is_some() => url,
        _ => {
            let scheme = if default_tls { "https://" } else { "http://" };
            Url::parse(&format!("{scheme}{host}"))
                .map_err(|_| ClientError::InvalidServerUrl(host.to_owned()))?
        }
    };

    if !url.path().is_empty() && url.path() != "/" {
        return Err(ClientError::InvalidServerUrl(host.to_owned()));
    }

    Ok((url, default_versioned_api_path(api_path, group_version)))
}

/// `/<api_path>/<group>/<version>`, empty segments are skipped
pub fn default_versioned_api_path(api_path: &str, group_version: &GroupVersion) -> String {
    let segments: Vec<&str> = api_path
        .split('/')
        .chain(group_version.group.split('/'))
        .chain(group_version.version.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// true when talking to the server described by `config` uses TLS
pub fn is_config_transport_tls(config: &RestConfig) -> bool {
    let default_tls = config.has_ca() || config.has_cert_auth() || config.tls.insecure;
    let host = if config.host.is_empty() {
        "localhost"
    } else {
        config.host.as_str()
    };
    match default_server_url(host, "", &GroupVersion::default(), default_tls) {
        Ok((url, _)) => url.scheme() == "https",
        Err(_) => false,
    }
}

/// url without the trailing slash the root path serializes to
pub fn endpoint_string(url: &Url) -> String {
    let value = url.as_str();
    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        value.trim_end_matches('/').to_owned()
    } else {
        value.to_owned()
    }
}
