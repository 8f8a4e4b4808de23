use std::fs::read;
use std::io::Error as IoError;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use isahc::config::CaCertificate;
use isahc::config::ClientCertificate;
use isahc::config::Configurable;
use isahc::config::PrivateKey;
use isahc::config::SslOption;
use isahc::HttpClientBuilder;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use tempfile::NamedTempFile;
use tracing::debug;
use tracing::warn;

use k8_config::RestConfig;

use crate::auth::parse_expiry;
use crate::auth::run_exec_plugin;
use crate::auth::CachedToken;
use crate::auth::Credential;
use crate::auth::RefreshingToken;
use crate::auth::TokenSource;
use crate::http::header::HeaderMap;
use crate::http::header::HeaderName;
use crate::http::header::HeaderValue;
use crate::http::Uri;
use crate::server_url::is_config_transport_tls;
use crate::ClientError;
use crate::HttpClient;

const IMPERSONATE_USER: &str = "impersonate-user";
const IMPERSONATE_GROUP: &str = "impersonate-group";

pub trait ConfigBuilder: Sized {
    type Client;

    fn new() -> Self;

    fn build(self) -> Result<Self::Client, ClientError>;

    fn load_ca_certificate(self, ca_path: impl AsRef<Path>) -> Result<Self, IoError>;

    // load from ca data
    fn load_ca_cert_with_data(self, data: Vec<u8>) -> Result<Self, IoError>;

    // load client certificate (crt) and private key
    fn load_client_certificate<P: AsRef<Path>>(
        self,
        client_crt_path: P,
        client_key_path: P,
    ) -> Result<Self, IoError>;

    fn load_client_certificate_with_data(
        self,
        client_crt: Vec<u8>,
        client_key: Vec<u8>,
    ) -> Result<Self, IoError>;

    fn skip_verify(self) -> Self;

    fn timeout(self, timeout: Duration) -> Self;

    fn proxy(self, proxy: Uri) -> Self;

    fn disable_compression(self) -> Self;
}

pub struct IsahcConfigBuilder {
    inner: HttpClientBuilder,
    // curl only reads CA bundles from disk, inline data lives here until the client is dropped
    ca_file: Option<NamedTempFile>,
}

impl ConfigBuilder for IsahcConfigBuilder {
    type Client = (isahc::HttpClient, Option<NamedTempFile>);

    fn new() -> Self {
        Self {
            inner: HttpClientBuilder::new(),
            ca_file: None,
        }
    }

    fn build(self) -> Result<Self::Client, ClientError> {
        Ok((self.inner.build()?, self.ca_file))
    }

    fn load_ca_certificate(self, ca_path: impl AsRef<Path>) -> Result<Self, IoError> {
        let ca_path = ca_path.as_ref();
        debug!(path = %ca_path.display(), "loading CA certificate");
        Ok(Self {
            inner: self
                .inner
                .ssl_ca_certificate(CaCertificate::file(ca_path.to_owned())),
            ca_file: self.ca_file,
        })
    }

    fn load_ca_cert_with_data(self, data: Vec<u8>) -> Result<Self, IoError> {
        let mut file = NamedTempFile::new()?;
        file.write_all(&data)?;
        file.flush()?;
        debug!(path = %file.path().display(), "wrote inline CA certificate");

        let mut builder = self.load_ca_certificate(file.path())?;
        builder.ca_file = Some(file);
        Ok(builder)
    }

    fn load_client_certificate<P: AsRef<Path>>(
        self,
        client_crt_path: P,
        client_key_path: P,
    ) -> Result<Self, IoError> {
        debug!(
            crt = %client_crt_path.as_ref().display(),
            key = %client_key_path.as_ref().display(),
            "loading client certificate"
        );
        let client_crt = read(client_crt_path)?;
        let client_key = read(client_key_path)?;
        self.load_client_certificate_with_data(client_crt, client_key)
    }

    fn load_client_certificate_with_data(
        self,
        client_crt: Vec<u8>,
        client_key: Vec<u8>,
    ) -> Result<Self, IoError> {
        let certificate =
            ClientCertificate::pem(client_crt, PrivateKey::pem(client_key, None::<String>));
        Ok(Self {
            inner: self.inner.ssl_client_certificate(certificate),
            ca_file: self.ca_file,
        })
    }

    fn skip_verify(self) -> Self {
        warn!("server certificate will not be verified");
        Self {
            inner: self.inner.ssl_options(
                SslOption::DANGER_ACCEPT_INVALID_CERTS | SslOption::DANGER_ACCEPT_INVALID_HOSTS,
            ),
            ca_file: self.ca_file,
        }
    }

    fn timeout(self, timeout: Duration) -> Self {
        Self {
            inner: self.inner.timeout(timeout),
            ca_file: self.ca_file,
        }
    }

    fn proxy(self, proxy: Uri) -> Self {
        Self {
            inner: self.inner.proxy(Some(proxy)),
            ca_file: self.ca_file,
        }
    }

    fn disable_compression(self) -> Self {
        Self {
            inner: self.inner.automatic_decompression(false),
            ca_file: self.ca_file,
        }
    }
}

/// HTTP client with the TLS settings, credentials and impersonation of `config`
pub fn transport_for(config: &RestConfig) -> Result<HttpClient, ClientError> {
    let tls = &config.tls;
    if config.has_ca() && tls.insecure {
        return Err(ClientError::Tls(
            "specifying a root certificates file with the insecure flag is not allowed".to_owned(),
        ));
    }

    let mut builder = IsahcConfigBuilder::new();

    if let Some(ca_data) = &tls.ca_data {
        builder = builder.load_ca_cert_with_data(ca_data.clone())?;
    } else if let Some(ca_file) = &tls.ca_file {
        builder = builder.load_ca_certificate(ca_file)?;
    } else if tls.insecure {
        builder = builder.skip_verify();
    }

    if let Some(server_name) = &tls.server_name {
        warn!(%server_name, "tls server name can't be set on this transport, using the server host");
    }

    builder = with_client_certificate(builder, config)?;

    let (credential, exec_certificate) = credential(config)?;
    if let Some((crt, key)) = exec_certificate {
        if config.has_cert_auth() {
            return Err(ClientError::Auth(
                "exec plugin returned a client certificate but one is already configured"
                    .to_owned(),
            ));
        }
        builder = builder.load_client_certificate_with_data(crt, key)?;
    }

    if let Some(timeout) = config.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(proxy_url) = &config.proxy_url {
        builder = builder.proxy(proxy_url.parse::<Uri>()?);
    }
    if config.disable_compression {
        builder = builder.disable_compression();
    }

    let (inner, ca_file) = builder.build()?;

    Ok(HttpClient::new(
        inner,
        credential.map(Arc::new),
        impersonation_headers(config)?,
        is_config_transport_tls(config),
        ca_file.map(Arc::new),
    ))
}

type PemPair = (Vec<u8>, Vec<u8>);

fn with_client_certificate(
    builder: IsahcConfigBuilder,
    config: &RestConfig,
) -> Result<IsahcConfigBuilder, ClientError> {
    if !config.has_cert_auth() {
        return Ok(builder);
    }
    let tls = &config.tls;
    if let (None, None, Some(crt), Some(key)) =
        (&tls.cert_data, &tls.key_data, &tls.cert_file, &tls.key_file)
    {
        return Ok(builder.load_client_certificate(crt, key)?);
    }

    let crt = match (&tls.cert_data, &tls.cert_file) {
        (Some(data), _) => data.clone(),
        (None, Some(path)) => read(path)?,
        (None, None) => return Ok(builder),
    };
    let key = match (&tls.key_data, &tls.key_file) {
        (Some(data), _) => data.expose_secret().to_vec(),
        (None, Some(path)) => read(path)?,
        (None, None) => return Ok(builder),
    };
    Ok(builder.load_client_certificate_with_data(crt, key)?)
}

/// request credential, plus a client certificate when an exec plugin hands one out
fn credential(config: &RestConfig) -> Result<(Option<Credential>, Option<PemPair>), ClientError> {
    let token = config.has_token_auth();
    let basic = config.has_basic_auth();
    let plugins = config.exec.is_some() as u8 + config.auth_provider.is_some() as u8;

    if token && basic {
        return Err(ClientError::Auth(
            "username/password or bearer token may be set, but not both".to_owned(),
        ));
    }
    if plugins > 1 {
        return Err(ClientError::Auth(
            "execProvider and authProvider cannot be used in combination".to_owned(),
        ));
    }
    if plugins > 0 && (token || basic) {
        return Err(ClientError::Auth(
            "credential plugins cannot be used in combination with a token or basic auth"
                .to_owned(),
        ));
    }

    let credential = if let Some(token) = &config.bearer_token {
        Some(Credential::Bearer(token.clone()))
    } else if let Some(path) = &config.bearer_token_file {
        Some(Credential::TokenFile(path.clone()))
    } else if let Some(username) = &config.username {
        Some(Credential::Basic {
            username: username.clone(),
            password: config
                .password
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new())),
        })
    } else if let Some(exec) = &config.exec {
        let status = run_exec_plugin(exec)?;
        let expiry = status.expiry()?;
        let certificate = match (&status.client_certificate_data, &status.client_key_data) {
            (Some(crt), Some(key)) => Some((
                crt.clone().into_bytes(),
                key.expose_secret().as_bytes().to_vec(),
            )),
            _ => None,
        };
        let credential = status.token.map(|token| {
            Credential::Refreshing(RefreshingToken::new(
                TokenSource::Exec(exec.clone()),
                Some(CachedToken { token, expiry }),
            ))
        });
        if let Some(credential) = &credential {
            debug!(kind = credential.kind(), "using credential");
        }
        return Ok((credential, certificate));
    } else if let Some(provider) = &config.auth_provider {
        let gcp = provider.gcp().ok_or_else(|| {
            ClientError::Auth(format!(
                "no auth provider found for name {:?}",
                provider.name
            ))
        })?;
        let initial = match &gcp.access_token {
            Some(token) => Some(CachedToken {
                token: token.clone(),
                expiry: parse_expiry(gcp.expiry.as_deref())?,
            }),
            None => None,
        };
        Some(Credential::Refreshing(RefreshingToken::new(
            TokenSource::Gcp(gcp),
            initial,
        )))
    } else {
        None
    };

    match &credential {
        Some(credential) => debug!(kind = credential.kind(), "using credential"),
        None => debug!("no credential configured"),
    }
    Ok((credential, None))
}

fn impersonation_headers(config: &RestConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(user) = &config.impersonate {
        headers.insert(
            HeaderName::from_static(IMPERSONATE_USER),
            HeaderValue::from_str(user)?,
        );
    }
    for group in &config.impersonate_groups {
        headers.append(
            HeaderName::from_static(IMPERSONATE_GROUP),
            HeaderValue::from_str(group)?,
        );
    }
    Ok(headers)
}

#[cfg(test)]
mod test {

    use secrecy::SecretString;

    use k8_config::AuthProviderDetail;
    use k8_config::RestConfig;

    use crate::ClientError;

    use super::{credential, impersonation_headers, transport_for};

    fn https() -> RestConfig {
        RestConfig {
            host: "https://example.test:6443".to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ca_with_insecure_rejected() {
        let mut config = https();
        config.tls.insecure = true;
        config.tls.ca_file = Some("ca.crt".into());
        assert!(matches!(transport_for(&config), Err(ClientError::Tls(_))));
    }

    #[test]
    fn test_token_and_basic_rejected() {
        let mut config = https();
        config.bearer_token = Some(SecretString::from("abc".to_owned()));
        config.username = Some("admin".to_owned());
        assert!(matches!(credential(&config), Err(ClientError::Auth(_))));
    }

    #[test]
    fn test_unknown_auth_provider_rejected() {
        let mut config = https();
        config.auth_provider = Some(AuthProviderDetail {
            name: "oidc".to_owned(),
            ..Default::default()
        });
        assert!(matches!(credential(&config), Err(ClientError::Auth(_))));
    }

    #[test]
    fn test_gcp_uses_stored_token() {
        let mut config = https();
        let mut provider = AuthProviderDetail {
            name: "gcp".to_owned(),
            ..Default::default()
        };
        provider
            .config
            .insert("access-token".to_owned(), "ya29.token".to_owned());
        provider
            .config
            .insert("expiry".to_owned(), "2099-01-01T00:00:00Z".to_owned());
        config.auth_provider = Some(provider);

        let (credential, certificate) = credential(&config).expect("credential");
        let credential = credential.expect("set");
        assert!(certificate.is_none());
        assert_eq!(
            credential.header().expect("header").to_str().unwrap(),
            "Bearer ya29.token"
        );
    }

    #[test]
    fn test_bearer_transport() {
        let mut config = https();
        config.bearer_token = Some(SecretString::from("abc".to_owned()));
        let client = transport_for(&config).expect("client");
        assert!(client.is_tls());
        assert_eq!(client.credential_kind(), Some("bearer token"));
    }

    #[test]
    fn test_plain_http_transport() {
        let config = RestConfig {
            host: "http://localhost:8001".to_owned(),
            ..Default::default()
        };
        let client = transport_for(&config).expect("client");
        assert!(!client.is_tls());
        assert_eq!(client.credential_kind(), None);
    }

    #[test]
    fn test_inline_ca_kept_on_disk() {
        let mut config = https();
        config.tls.ca_data = Some(b"-----BEGIN CERTIFICATE-----\n".to_vec());
        let client = transport_for(&config).expect("client");
        let path = client.ca_file().expect("ca file").to_owned();
        assert!(path.exists());
        drop(client);
        assert!(!path.exists());
    }

    #[test]
    fn test_impersonation_headers() {
        let mut config = https();
        config.impersonate = Some("jane".to_owned());
        config.impersonate_groups = vec!["dev".to_owned(), "ops".to_owned()];
        let headers = impersonation_headers(&config).expect("headers");
        assert_eq!(headers.get("impersonate-user").unwrap(), "jane");
        let groups: Vec<_> = headers.get_all("impersonate-group").iter().collect();
        assert_eq!(groups, vec!["dev", "ops"]);
    }
}
