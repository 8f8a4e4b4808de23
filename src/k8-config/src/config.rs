use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use dirs::home_dir;
use secrecy::ExposeSecret;
use secrecy::SecretString;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use tracing::trace;

use crate::ConfigError;

#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub cluster: ClusterDetail,
}

#[derive(Debug, Eq, PartialEq, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_skip_tls_verify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_authority_data: Option<String>,
    #[serde(default)]
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_server_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl ClusterDetail {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn insecure(&self) -> bool {
        self.insecure_skip_tls_verify.unwrap_or(false)
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
pub struct Context {
    pub name: String,
    pub context: ContextDetail,
}

#[derive(Debug, Eq, PartialEq, Default, Clone, Serialize, Deserialize)]
pub struct ContextDetail {
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ContextDetail {
    pub fn namespace(&self) -> &str {
        match &self.namespace {
            Some(nm) if !nm.is_empty() => nm,
            _ => crate::DEFAULT_NAMESPACE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub user: UserDetail,
}

/// `auth-provider` entry of a user
#[derive(Debug, Eq, PartialEq, Default, Clone, Serialize, Deserialize)]
pub struct AuthProviderDetail {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}

impl AuthProviderDetail {
    /// settings of the gcp provider, None for any other provider
    pub fn gcp(&self) -> Option<GcpAuthProviderConfig> {
        if self.name != "gcp" {
            return None;
        }
        let get = |key: &str| self.config.get(key).cloned();
        Some(GcpAuthProviderConfig {
            access_token: get("access-token").map(SecretString::from),
            cmd_args: get("cmd-args"),
            cmd_path: get("cmd-path"),
            expiry: get("expiry"),
            expiry_key: get("expiry-key"),
            token_key: get("token-key"),
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct GcpAuthProviderConfig {
    pub access_token: Option<SecretString>,
    pub cmd_args: Option<String>,
    pub cmd_path: Option<String>,
    pub expiry: Option<String>,
    pub expiry_key: Option<String>,
    pub token_key: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_provider: Option<AuthProviderDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_certificate_data: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub client_key_data: Option<SecretString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<Exec>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub token: Option<SecretString>,
    #[serde(rename = "tokenFile", skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub password: Option<SecretString>,
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub impersonate: Option<String>,
    #[serde(rename = "as-groups", skip_serializing_if = "Option::is_none")]
    pub impersonate_groups: Option<Vec<String>>,
}

/// credential plugin, see `client.authentication.k8s.io`
#[derive(Debug, Eq, PartialEq, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exec {
    pub api_version: String,
    pub command: String,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub env: Vec<ExecEnvVar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
}

#[derive(Debug, Eq, PartialEq, Clone, Serialize, Deserialize)]
pub struct ExecEnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KubeConfig {
    #[serde(skip)]
    pub path: PathBuf,
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub clusters: Vec<Cluster>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub contexts: Vec<Context>,
    #[serde(default)]
    pub current_context: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub users: Vec<User>,
}

// kubectl writes `clusters: null` for an empty list
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// serde helper writing an optional secret as a plain string
pub fn serialize_secret<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match secret {
        Some(secret) => serializer.serialize_str(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

impl KubeConfig {
    /// location of the kubeconfig in the home directory, `~/.kube/config`
    pub fn home_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".kube").join("config"))
    }

    /// read from default home directory
    pub fn from_home() -> Result<Self, ConfigError> {
        let path = Self::home_path()
            .ok_or_else(|| ConfigError::Other("home directory could not be found".to_owned()))?;
        Self::from_file(path)
    }

    pub fn from_file<T: AsRef<Path>>(path: T) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|source| ConfigError::KubeConfigRead {
            path: path.to_owned(),
            source,
        })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let mut config = Self::from_yaml(&contents)?;
        config.path = path.to_path_buf();
        Ok(config)
    }

    /// parse kubeconfig content, an empty document is an empty config
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty() && self.contexts.is_empty() && self.users.is_empty()
    }

    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.iter().find(|c| c.name == name)
    }

    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters.iter().find(|c| c.name == name)
    }

    pub fn user(&self, name: &str) -> Option<&User> {
        self.users.iter().find(|u| u.name == name)
    }

    pub fn current_context(&self) -> Option<&Context> {
        self.context(&self.current_context)
    }

    pub fn current_cluster(&self) -> Option<&Cluster> {
        self.current_context()
            .and_then(|ctx| self.cluster(&ctx.context.cluster))
    }

    pub fn current_user(&self) -> Option<&User> {
        self.current_context()
            .and_then(|ctx| self.user(&ctx.context.user))
    }

    /// merge entries of a lower priority config into this one.
    /// entries already present by name and a non empty current context are kept.
    pub fn merge(&mut self, other: KubeConfig) {
        if self.current_context.is_empty() {
            self.current_context = other.current_context;
        }
        if self.api_version.is_empty() {
            self.api_version = other.api_version;
        }
        if self.kind.is_empty() {
            self.kind = other.kind;
        }

        for cluster in other.clusters {
            if self.cluster(&cluster.name).is_none() {
                self.clusters.push(cluster);
            } else {
                trace!(name = %cluster.name, "cluster already defined, skipping");
            }
        }
        for context in other.contexts {
            if self.context(&context.name).is_none() {
                self.contexts.push(context);
            } else {
                trace!(name = %context.name, "context already defined, skipping");
            }
        }
        for user in other.users {
            if self.user(&user.name).is_none() {
                self.users.push(user);
            } else {
                trace!(name = %user.name, "user already defined, skipping");
            }
        }
    }

    /// make relative file references absolute, relative to `base`
    pub fn resolve_paths(&mut self, base: &Path) {
        for cluster in self.clusters.iter_mut() {
            resolve(&mut cluster.cluster.certificate_authority, base);
        }
        for user in self.users.iter_mut() {
            let detail = &mut user.user;
            resolve(&mut detail.client_certificate, base);
            resolve(&mut detail.client_key, base);
            resolve(&mut detail.token_file, base);
            if let Some(exec) = detail.exec.as_mut() {
                // bare command names are looked up in PATH
                if exec.command.contains(std::path::MAIN_SEPARATOR) {
                    exec.command = absolute(&exec.command, base);
                }
            }
        }
    }
}

fn resolve(path: &mut Option<String>, base: &Path) {
    if let Some(value) = path.as_mut() {
        if !value.is_empty() {
            *value = absolute(value, base);
        }
    }
}

fn absolute(path: &str, base: &Path) -> String {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        path.to_owned()
    } else {
        base.join(candidate).to_string_lossy().into_owned()
    }
}
