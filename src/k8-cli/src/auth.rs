//! Credentials attached to every request.
//!
//! Static tokens and basic auth are rendered once. Token files are re-read on
//! each request. Plugin tokens (exec credential plugins and the gcp auth
//! provider) are cached until they expire.

use std::fs::read_to_string;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use k8_config::Exec;
use k8_config::GcpAuthProviderConfig;

use crate::http::header::HeaderValue;
use crate::ClientError;

const EXEC_INFO_ENV: &str = "KUBERNETES_EXEC_INFO";
const EXEC_CREDENTIAL_KIND: &str = "ExecCredential";

// refresh a bit before the server starts rejecting the token
const EXPIRY_SKEW_SECS: i64 = 10;

/// `ExecCredential` as printed by credential plugins
#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredential {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub spec: ExecCredentialSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecCredentialStatus>,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialSpec {
    #[serde(default)]
    pub interactive: bool,
}

#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ExecCredentialStatus {
    pub expiration_timestamp: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "k8_config::serialize_secret",
        deserialize_with = "k8_config::deserialize_secret"
    )]
    pub token: Option<SecretString>,
    pub client_certificate_data: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "k8_config::serialize_secret",
        deserialize_with = "k8_config::deserialize_secret"
    )]
    pub client_key_data: Option<SecretString>,
}

impl ExecCredentialStatus {
    pub fn expiry(&self) -> Result<Option<DateTime<Utc>>, ClientError> {
        parse_expiry(self.expiration_timestamp.as_deref())
    }
}

pub(crate) fn parse_expiry(value: Option<&str>) -> Result<Option<DateTime<Utc>>, ClientError> {
    match value.filter(|v| !v.is_empty()) {
        Some(ts) => DateTime::parse_from_rfc3339(ts)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|err| ClientError::Auth(format!("invalid expiry {ts:?}: {err}"))),
        None => Ok(None),
    }
}

/// run an exec credential plugin and return its status
pub fn run_exec_plugin(exec: &Exec) -> Result<ExecCredentialStatus, ClientError> {
    let info = ExecCredential {
        api_version: exec.api_version.clone(),
        kind: EXEC_CREDENTIAL_KIND.to_owned(),
        spec: ExecCredentialSpec { interactive: false },
        status: None,
    };

    debug!(command = %exec.command, "running exec credential plugin");
    let output = Command::new(&exec.command)
        .args(&exec.args)
        .envs(exec.env.iter().map(|var| (&var.name, &var.value)))
        .env(EXEC_INFO_ENV, serde_json::to_string(&info)?)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|err| {
            let hint = exec.install_hint.as_deref().unwrap_or_default();
            ClientError::Auth(format!(
                "exec plugin {:?} could not be started: {err}. {hint}",
                exec.command
            ))
        })?;

    if !output.status.success() {
        return Err(ClientError::Auth(format!(
            "exec plugin {:?} failed with {}",
            exec.command, output.status
        )));
    }

    let credential: ExecCredential = serde_json::from_slice(&output.stdout)?;
    if credential.kind != EXEC_CREDENTIAL_KIND {
        return Err(ClientError::Auth(format!(
            "exec plugin returned kind {:?}, expected {EXEC_CREDENTIAL_KIND}",
            credential.kind
        )));
    }
    if credential.api_version != exec.api_version {
        return Err(ClientError::Auth(format!(
            "exec plugin is configured to use api version {}, plugin returned version {}",
            exec.api_version, credential.api_version
        )));
    }

    let status = credential
        .status
        .ok_or_else(|| ClientError::Auth("exec plugin didn't return a status field".to_owned()))?;
    let has_cert = status.client_certificate_data.is_some();
    if status.token.is_none() && !has_cert {
        return Err(ClientError::Auth(
            "exec plugin didn't return a token or cert/key pair".to_owned(),
        ));
    }
    if has_cert != status.client_key_data.is_some() {
        return Err(ClientError::Auth(
            "exec plugin returned only certificate or key, not both".to_owned(),
        ));
    }
    Ok(status)
}

/// ask `gcloud` (or whatever `cmd-path` points at) for an access token
pub fn run_gcp_provider(gcp: &GcpAuthProviderConfig) -> Result<CachedToken, ClientError> {
    let cmd_path = gcp.cmd_path.as_deref().ok_or_else(|| {
        ClientError::Auth("gcp auth provider needs cmd-path to refresh tokens".to_owned())
    })?;
    let args = gcp.cmd_args.as_deref().unwrap_or_default();

    debug!(command = %cmd_path, "running gcp token command");
    let output = Command::new(cmd_path)
        .args(args.split_whitespace())
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()?;

    if !output.status.success() {
        return Err(ClientError::Auth(format!(
            "gcp token command {cmd_path:?} failed with {}",
            output.status
        )));
    }

    let json: Value = serde_json::from_slice(&output.stdout)?;
    let token_key = gcp
        .token_key
        .as_deref()
        .unwrap_or("{.credential.access_token}");
    let expiry_key = gcp
        .expiry_key
        .as_deref()
        .unwrap_or("{.credential.token_expiry}");

    let token = extract_value(&json, token_key)?.ok_or_else(|| {
        ClientError::Auth(format!("gcp token command output has no {token_key}"))
    })?;
    let expiry = parse_expiry(extract_value(&json, expiry_key)?.as_deref())?;

    Ok(CachedToken {
        token: SecretString::from(token),
        expiry,
    })
}

/// string at a kubectl style `{.a.b[0].c}` json path, None when nothing matches
fn extract_value(json: &Value, path: &str) -> Result<Option<String>, ClientError> {
    let pure_path = path.trim_matches(|c| c == '"' || c == '{' || c == '}');
    let found = jsonpath_lib::select(json, &format!("${pure_path}"))
        .map_err(|err| ClientError::Auth(format!("invalid json path {path:?}: {err}")))?;
    match found.first() {
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ClientError::Auth(format!("value at {pure_path} is not a string"))),
        None => Ok(None),
    }
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    pub token: SecretString,
    pub expiry: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(EXPIRY_SKEW_SECS) <= Utc::now(),
            None => false,
        }
    }
}

#[derive(Debug)]
pub enum TokenSource {
    Exec(Exec),
    Gcp(GcpAuthProviderConfig),
}

impl TokenSource {
    fn fetch(&self) -> Result<CachedToken, ClientError> {
        match self {
            Self::Exec(exec) => {
                let status = run_exec_plugin(exec)?;
                let token = status.token.clone().ok_or_else(|| {
                    ClientError::Auth("exec plugin didn't return a token".to_owned())
                })?;
                Ok(CachedToken {
                    token,
                    expiry: status.expiry()?,
                })
            }
            Self::Gcp(gcp) => run_gcp_provider(gcp),
        }
    }
}

/// plugin token, fetched again once expired
#[derive(Debug)]
pub struct RefreshingToken {
    source: TokenSource,
    cache: Mutex<Option<CachedToken>>,
}

impl RefreshingToken {
    pub fn new(source: TokenSource, initial: Option<CachedToken>) -> Self {
        Self {
            source,
            cache: Mutex::new(initial),
        }
    }

    pub fn token(&self) -> Result<SecretString, ClientError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| ClientError::Auth("token cache poisoned".to_owned()))?;

        if let Some(cached) = cache.as_ref().filter(|c| !c.is_expired()) {
            return Ok(cached.token.clone());
        }

        debug!("refreshing plugin token");
        let fresh = self.source.fetch()?;
        let token = fresh.token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

/// how requests are authenticated
#[derive(Debug)]
pub enum Credential {
    Bearer(SecretString),
    TokenFile(PathBuf),
    Basic {
        username: String,
        password: SecretString,
    },
    Refreshing(RefreshingToken),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bearer(_) => "bearer token",
            Self::TokenFile(_) => "token file",
            Self::Basic { .. } => "basic auth",
            Self::Refreshing(_) => "plugin token",
        }
    }

    /// value of the `Authorization` header
    pub fn header(&self) -> Result<HeaderValue, ClientError> {
        let value = match self {
            Self::Bearer(token) => format!("Bearer {}", token.expose_secret()),
            Self::TokenFile(path) => format!("Bearer {}", read_to_string(path)?.trim()),
            Self::Basic { username, password } => {
                let pair = format!("{username}:{}", password.expose_secret());
                format!("Basic {}", STANDARD.encode(pair))
            }
            Self::Refreshing(token) => format!("Bearer {}", token.token()?.expose_secret()),
        };
        let mut header = HeaderValue::from_str(&value)?;
        header.set_sensitive(true);
        Ok(header)
    }
}

#[cfg(test)]
mod test {

    use std::fs;

    use chrono::Duration;
    use chrono::Utc;
    use secrecy::ExposeSecret;
    use secrecy::SecretString;
    use serde_json::json;
    use tempfile::TempDir;

    use k8_config::Exec;
    use k8_config::ExecEnvVar;
    use k8_config::GcpAuthProviderConfig;

    use crate::ClientError;

    use super::{
        extract_value, run_exec_plugin, run_gcp_provider, CachedToken, Credential,
        ExecCredential, RefreshingToken, TokenSource,
    };

    const V1: &str = "client.authentication.k8s.io/v1";

    /// write a shell script into `dir`, run through `sh` so it needs no exec bit
    fn script(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("plugin.sh");
        fs::write(&path, body).expect("script");
        path.to_str().expect("utf8 path").to_owned()
    }

    fn exec(script: String) -> Exec {
        Exec {
            api_version: V1.to_owned(),
            command: "sh".to_owned(),
            args: vec![script],
            ..Default::default()
        }
    }

    fn reply(status: &str) -> String {
        format!(
            "cat <<'EOF'\n{{\"apiVersion\":\"{V1}\",\"kind\":\"ExecCredential\",\"status\":{status}}}\nEOF\n"
        )
    }

    #[test]
    fn test_decode_exec_credential() {
        let credential: ExecCredential = serde_json::from_str(
            r#"{
                "apiVersion": "client.authentication.k8s.io/v1",
                "kind": "ExecCredential",
                "status": {
                    "token": "abc",
                    "expirationTimestamp": "2030-01-01T00:00:00Z"
                }
            }"#,
        )
        .expect("credential");
        let status = credential.status.expect("status");
        assert_eq!(status.token.as_ref().map(|t| t.expose_secret()), Some("abc"));
        assert!(!format!("{status:?}").contains("abc"));
        let expiry = status.expiry().expect("expiry").expect("set");
        assert_eq!(expiry.to_rfc3339(), "2030-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_extract_value() {
        let value = json!({"credential": {"access_token": "tok", "token_expiry": "x"}});
        assert_eq!(
            extract_value(&value, "{.credential.access_token}").expect("path"),
            Some("tok".to_owned())
        );
        assert_eq!(extract_value(&value, "{.credential.missing}").expect("path"), None);
        assert!(extract_value(&value, "{.credential}").is_err());
    }

    #[test]
    fn test_extract_value_array_index() {
        let value = json!({"items": [{"token": "first"}, {"token": "second"}]});
        assert_eq!(
            extract_value(&value, "{.items[0].token}").expect("path"),
            Some("first".to_owned())
        );
        assert_eq!(
            extract_value(&value, "{.items[1].token}").expect("path"),
            Some("second".to_owned())
        );
    }

    #[test]
    fn test_basic_header() {
        let credential = Credential::Basic {
            username: "admin".to_owned(),
            password: SecretString::from("secret".to_owned()),
        };
        let header = credential.header().expect("header");
        assert_eq!(header.to_str().unwrap(), "Basic YWRtaW46c2VjcmV0");
        assert!(header.is_sensitive());
    }

    #[test]
    fn test_credential_debug_hides_secrets() {
        let bearer = Credential::Bearer(SecretString::from("s3cr3t-token".to_owned()));
        assert!(!format!("{bearer:?}").contains("s3cr3t-token"));
        assert_eq!(
            bearer.header().expect("header").to_str().unwrap(),
            "Bearer s3cr3t-token"
        );

        let basic = Credential::Basic {
            username: "admin".to_owned(),
            password: SecretString::from("hunter2".to_owned()),
        };
        let debug = format!("{basic:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("hunter2"));

        let refreshing = Credential::Refreshing(RefreshingToken::new(
            TokenSource::Gcp(GcpAuthProviderConfig::default()),
            Some(CachedToken {
                token: SecretString::from("cached-token".to_owned()),
                expiry: None,
            }),
        ));
        assert!(!format!("{refreshing:?}").contains("cached-token"));
    }

    #[test]
    fn test_cached_token_used_until_expiry() {
        // a source that can't run, only the cache can answer
        let source = TokenSource::Gcp(GcpAuthProviderConfig::default());

        let fresh = RefreshingToken::new(
            TokenSource::Gcp(GcpAuthProviderConfig::default()),
            Some(CachedToken {
                token: SecretString::from("cached".to_owned()),
                expiry: Some(Utc::now() + Duration::hours(1)),
            }),
        );
        assert_eq!(fresh.token().expect("cached").expose_secret(), "cached");

        let expired = RefreshingToken::new(
            source,
            Some(CachedToken {
                token: SecretString::from("stale".to_owned()),
                expiry: Some(Utc::now() - Duration::hours(1)),
            }),
        );
        assert!(expired.token().is_err());
    }

    #[test]
    fn test_exec_plugin_token() {
        let dir = tempfile::tempdir().expect("dir");
        let body = reply(r#"{"token":"exec-token","expirationTimestamp":"2099-01-01T00:00:00Z"}"#);
        let status = run_exec_plugin(&exec(script(&dir, &body))).expect("status");

        assert_eq!(
            status.token.as_ref().map(|t| t.expose_secret()),
            Some("exec-token")
        );
        let expiry = status.expiry().expect("expiry").expect("set");
        assert_eq!(expiry.to_rfc3339(), "2099-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_exec_plugin_sees_exec_info() {
        let dir = tempfile::tempdir().expect("dir");
        let mut plugin = exec(script(
            &dir,
            &format!(
                "case \"$KUBERNETES_EXEC_INFO\" in\n  *'\"kind\":\"ExecCredential\"'*) ;;\n  *) exit 3 ;;\nesac\n[ \"$EXTRA\" = yes ] || exit 4\n{}",
                reply(r#"{"token":"t"}"#)
            ),
        ));
        plugin.env.push(ExecEnvVar {
            name: "EXTRA".to_owned(),
            value: "yes".to_owned(),
        });
        assert!(run_exec_plugin(&plugin).is_ok());
    }

    #[test]
    fn test_exec_plugin_kind_mismatch() {
        let dir = tempfile::tempdir().expect("dir");
        let body = format!(
            "cat <<'EOF'\n{{\"apiVersion\":\"{V1}\",\"kind\":\"Status\",\"status\":{{\"token\":\"t\"}}}}\nEOF\n"
        );
        let err = run_exec_plugin(&exec(script(&dir, &body))).expect_err("kind");
        assert!(matches!(&err, ClientError::Auth(msg) if msg.contains("kind")), "{err}");
    }

    #[test]
    fn test_exec_plugin_api_version_mismatch() {
        let dir = tempfile::tempdir().expect("dir");
        let mut plugin = exec(script(&dir, &reply(r#"{"token":"t"}"#)));
        plugin.api_version = "client.authentication.k8s.io/v1beta1".to_owned();
        let err = run_exec_plugin(&plugin).expect_err("api version");
        assert!(
            matches!(&err, ClientError::Auth(msg) if msg.contains("api version")),
            "{err}"
        );
    }

    #[test]
    fn test_exec_plugin_cert_only() {
        let dir = tempfile::tempdir().expect("dir");
        let body = reply(r#"{"clientCertificateData":"CERT","clientKeyData":"KEY"}"#);
        let status = run_exec_plugin(&exec(script(&dir, &body))).expect("status");
        assert!(status.token.is_none());
        assert_eq!(status.client_certificate_data.as_deref(), Some("CERT"));
        assert_eq!(
            status.client_key_data.as_ref().map(|k| k.expose_secret()),
            Some("KEY")
        );

        let body = reply(r#"{"clientCertificateData":"CERT"}"#);
        assert!(run_exec_plugin(&exec(script(&dir, &body))).is_err());

        let body = reply("{}");
        assert!(run_exec_plugin(&exec(script(&dir, &body))).is_err());
    }

    #[test]
    fn test_exec_plugin_failure() {
        let dir = tempfile::tempdir().expect("dir");
        let err = run_exec_plugin(&exec(script(&dir, "exit 1\n"))).expect_err("failed");
        assert!(matches!(err, ClientError::Auth(_)));

        let plugin = Exec {
            api_version: V1.to_owned(),
            command: dir.path().join("missing").to_str().expect("utf8").to_owned(),
            install_hint: Some("install the plugin".to_owned()),
            ..Default::default()
        };
        let err = run_exec_plugin(&plugin).expect_err("missing");
        assert!(err.to_string().contains("install the plugin"), "{err}");
    }

    #[test]
    fn test_exec_token_refreshed_after_expiry() {
        let dir = tempfile::tempdir().expect("dir");
        let counter = dir.path().join("count");
        let body = format!(
            "n=$(cat \"$COUNTER\" 2>/dev/null || echo 0)\nn=$((n + 1))\necho $n > \"$COUNTER\"\nprintf '{{\"apiVersion\":\"{V1}\",\"kind\":\"ExecCredential\",\"status\":{{\"token\":\"tok-%s\",\"expirationTimestamp\":\"%s\"}}}}' \"$n\" \"$EXPIRY\"\n"
        );
        let path = script(&dir, &body);

        let with_expiry = |expiry: &str| {
            let mut plugin = exec(path.clone());
            plugin.env = vec![
                ExecEnvVar {
                    name: "COUNTER".to_owned(),
                    value: counter.to_str().expect("utf8").to_owned(),
                },
                ExecEnvVar {
                    name: "EXPIRY".to_owned(),
                    value: expiry.to_owned(),
                },
            ];
            RefreshingToken::new(TokenSource::Exec(plugin), None)
        };

        let expiring = with_expiry("2000-01-01T00:00:00Z");
        assert_eq!(expiring.token().expect("first").expose_secret(), "tok-1");
        assert_eq!(expiring.token().expect("second").expose_secret(), "tok-2");

        let lasting = with_expiry("2099-01-01T00:00:00Z");
        assert_eq!(lasting.token().expect("first").expose_secret(), "tok-3");
        assert_eq!(lasting.token().expect("cached").expose_secret(), "tok-3");
    }

    #[test]
    fn test_gcp_command() {
        let dir = tempfile::tempdir().expect("dir");
        let path = script(
            &dir,
            "cat <<'EOF'\n{\"credential\":{\"access_token\":\"gcp-token\",\"token_expiry\":\"2099-01-01T00:00:00Z\"}}\nEOF\n",
        );
        let gcp = GcpAuthProviderConfig {
            cmd_path: Some("sh".to_owned()),
            cmd_args: Some(path),
            ..Default::default()
        };
        let token = run_gcp_provider(&gcp).expect("token");
        assert_eq!(token.token.expose_secret(), "gcp-token");
        assert!(token.expiry.is_some());
    }

    #[test]
    fn test_gcp_command_custom_keys() {
        let dir = tempfile::tempdir().expect("dir");
        let path = script(&dir, "cat <<'EOF'\n{\"items\":[{\"token\":\"tok\"}]}\nEOF\n");
        let gcp = GcpAuthProviderConfig {
            cmd_path: Some("sh".to_owned()),
            cmd_args: Some(path),
            token_key: Some("{.items[0].token}".to_owned()),
            expiry_key: Some("{.items[0].expiry}".to_owned()),
            ..Default::default()
        };
        let token = run_gcp_provider(&gcp).expect("token");
        assert_eq!(token.token.expose_secret(), "tok");
        assert!(token.expiry.is_none());

        let gcp = GcpAuthProviderConfig {
            token_key: Some("{.items[3].token}".to_owned()),
            ..gcp
        };
        assert!(run_gcp_provider(&gcp).is_err());
    }
}
