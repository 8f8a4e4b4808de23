use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::ExposeSecret;
use secrecy::SecretSlice;
use secrecy::SecretString;
use tracing::debug;

use crate::ClusterDetail;
use crate::ConfigError;
use crate::ContextDetail;
use crate::KubeConfig;
use crate::LoadingRules;
use crate::PodConfig;
use crate::RestConfig;
use crate::UserDetail;
use crate::SERVICE_ACCOUNT_DIR;

/// Values given on the command line, they win over kubeconfig content
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub context: Option<String>,
    pub cluster: Option<String>,
    pub user: Option<String>,
    pub namespace: Option<String>,
    pub server: Option<String>,
    pub tls_server_name: Option<String>,
    pub certificate_authority: Option<String>,
    pub insecure_skip_tls_verify: Option<bool>,
    pub client_certificate: Option<String>,
    pub client_key: Option<String>,
    pub token: Option<SecretString>,
    pub impersonate: Option<String>,
    pub impersonate_groups: Vec<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub timeout: Option<Duration>,
    pub disable_compression: bool,
}

/// Resolves namespace and rest configuration from kubeconfig files and overrides.
/// Files are read on every call.
#[derive(Debug, Default, Clone)]
pub struct ClientConfigLoader {
    rules: LoadingRules,
    overrides: ConfigOverrides,
    account_dir: Option<PathBuf>,
}

impl ClientConfigLoader {
    pub fn new(rules: LoadingRules, overrides: ConfigOverrides) -> Self {
        Self {
            rules,
            overrides,
            account_dir: None,
        }
    }

    /// read in-cluster service account files from `dir` instead of the standard mount
    pub fn with_service_account_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.account_dir = Some(dir.into());
        self
    }

    fn account_dir(&self) -> &Path {
        self.account_dir
            .as_deref()
            .unwrap_or_else(|| Path::new(SERVICE_ACCOUNT_DIR))
    }

    pub fn rules(&self) -> &LoadingRules {
        &self.rules
    }

    pub fn overrides(&self) -> &ConfigOverrides {
        &self.overrides
    }

    /// merged kubeconfig without overrides
    pub fn raw_config(&self) -> Result<KubeConfig, ConfigError> {
        self.rules.load()
    }

    /// effective namespace and whether it came from an override
    pub fn namespace(&self) -> Result<(String, bool), ConfigError> {
        let raw = self.rules.load()?;
        let direct = DirectConfig::new(&raw, &self.overrides);
        let result = direct.namespace();

        let settled = match &result {
            Ok((_, overridden)) => *overridden,
            Err(err) => !err.is_empty_config(),
        };
        if settled || !PodConfig::possible_in(self.account_dir()) {
            return result;
        }
        if result.is_ok() && direct.explicit_namespace().is_some() {
            return result;
        }

        debug!("using in-cluster namespace");
        Ok((PodConfig::namespace_in(self.account_dir()), false))
    }

    pub fn client_config(&self) -> Result<RestConfig, ConfigError> {
        let raw = self.rules.load()?;
        match DirectConfig::new(&raw, &self.overrides).rest_config() {
            Err(err) if err.is_empty_config() => match PodConfig::load_from(self.account_dir()) {
                Some(pod) => {
                    debug!("using in-cluster configuration");
                    Ok(self.in_cluster(&pod))
                }
                None => Err(err),
            },
            result => result,
        }
    }

    fn in_cluster(&self, pod: &PodConfig) -> RestConfig {
        let overrides = &self.overrides;
        let mut config = RestConfig {
            host: pod.api_path(),
            bearer_token_file: Some(pod.token_path()),
            impersonate: overrides.impersonate.clone(),
            impersonate_groups: overrides.impersonate_groups.clone(),
            timeout: overrides.timeout,
            disable_compression: overrides.disable_compression,
            ..Default::default()
        };
        config.tls.ca_file = Some(pod.ca_path());

        if let Some(server) = non_empty(&overrides.server) {
            config.host = server.to_owned();
        }
        if let Some(ca) = non_empty(&overrides.certificate_authority) {
            config.tls.ca_file = Some(PathBuf::from(ca));
        }
        if let Some(token) = non_empty_secret(&overrides.token) {
            config.bearer_token = Some(token.clone());
            config.bearer_token_file = None;
        }
        config
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn non_empty_secret(value: &Option<SecretString>) -> Option<&SecretString> {
    value
        .as_ref()
        .filter(|secret| !secret.expose_secret().is_empty())
}

fn decode(data: &Option<String>) -> Result<Option<Vec<u8>>, ConfigError> {
    match non_empty(data) {
        Some(encoded) => Ok(Some(STANDARD.decode(encoded.trim())?)),
        None => Ok(None),
    }
}

fn decode_secret(data: &Option<SecretString>) -> Result<Option<SecretSlice<u8>>, ConfigError> {
    match non_empty_secret(data) {
        Some(encoded) => {
            let bytes = STANDARD.decode(encoded.expose_secret().trim())?;
            Ok(Some(SecretSlice::from(bytes)))
        }
        None => Ok(None),
    }
}

/// kubeconfig combined with overrides
struct DirectConfig<'a> {
    raw: &'a KubeConfig,
    overrides: &'a ConfigOverrides,
}

impl<'a> DirectConfig<'a> {
    fn new(raw: &'a KubeConfig, overrides: &'a ConfigOverrides) -> Self {
        Self { raw, overrides }
    }

    fn context_name(&self) -> (&str, bool) {
        match non_empty(&self.overrides.context) {
            Some(name) => (name, true),
            None => (self.raw.current_context.as_str(), false),
        }
    }

    fn context(&self) -> Result<ContextDetail, ConfigError> {
        let (name, required) = self.context_name();
        match self.raw.context(name) {
            Some(ctx) => Ok(ctx.context.clone()),
            None if required => Err(ConfigError::ContextNotFound(name.to_owned())),
            None => Ok(ContextDetail::default()),
        }
    }

    fn cluster_name(&self) -> Result<(String, bool), ConfigError> {
        match non_empty(&self.overrides.cluster) {
            Some(name) => Ok((name.to_owned(), true)),
            None => Ok((self.context()?.cluster, false)),
        }
    }

    fn user_name(&self) -> Result<(String, bool), ConfigError> {
        match non_empty(&self.overrides.user) {
            Some(name) => Ok((name.to_owned(), true)),
            None => Ok((self.context()?.user, false)),
        }
    }

    fn cluster(&self) -> Result<ClusterDetail, ConfigError> {
        let (name, required) = self.cluster_name()?;
        let mut cluster = match self.raw.cluster(&name) {
            Some(cluster) => cluster.cluster.clone(),
            None if required => return Err(ConfigError::ClusterNotFound(name)),
            None => ClusterDetail::default(),
        };

        let overrides = self.overrides;
        if let Some(server) = non_empty(&overrides.server) {
            cluster.server = server.to_owned();
            // a name for the old server is meaningless for the new one
            if non_empty(&overrides.tls_server_name).is_none() {
                cluster.tls_server_name = None;
            }
        }
        if let Some(name) = non_empty(&overrides.tls_server_name) {
            cluster.tls_server_name = Some(name.to_owned());
        }
        if let Some(ca) = non_empty(&overrides.certificate_authority) {
            cluster.certificate_authority = Some(ca.to_owned());
            cluster.certificate_authority_data = None;
        }
        if let Some(insecure) = overrides.insecure_skip_tls_verify {
            cluster.insecure_skip_tls_verify = Some(insecure);
            if insecure && non_empty(&overrides.certificate_authority).is_none() {
                cluster.certificate_authority = None;
                cluster.certificate_authority_data = None;
            }
        }
        Ok(cluster)
    }

    fn user(&self) -> Result<UserDetail, ConfigError> {
        let (name, required) = self.user_name()?;
        let mut user = match self.raw.user(&name) {
            Some(user) => user.user.clone(),
            None if required => return Err(ConfigError::UserNotFound(name)),
            None => UserDetail::default(),
        };

        let overrides = self.overrides;
        if let Some(token) = non_empty_secret(&overrides.token) {
            user.token = Some(token.clone());
            user.token_file = None;
            user.exec = None;
            user.auth_provider = None;
        }
        if non_empty(&overrides.client_certificate).is_some()
            || non_empty(&overrides.client_key).is_some()
        {
            user.client_certificate = overrides.client_certificate.clone();
            user.client_key = overrides.client_key.clone();
            user.client_certificate_data = None;
            user.client_key_data = None;
        }
        if let Some(username) = non_empty(&overrides.username) {
            user.username = Some(username.to_owned());
        }
        if let Some(password) = non_empty_secret(&overrides.password) {
            user.password = Some(password.clone());
        }
        if let Some(impersonate) = non_empty(&overrides.impersonate) {
            user.impersonate = Some(impersonate.to_owned());
        }
        if !overrides.impersonate_groups.is_empty() {
            user.impersonate_groups = Some(overrides.impersonate_groups.clone());
        }
        Ok(user)
    }

    /// namespace set on the selected context, if any
    fn explicit_namespace(&self) -> Option<String> {
        self.context()
            .ok()
            .and_then(|ctx| ctx.namespace)
            .filter(|ns| !ns.is_empty())
    }

    fn namespace(&self) -> Result<(String, bool), ConfigError> {
        if let Some(ns) = non_empty(&self.overrides.namespace) {
            return Ok((ns.to_owned(), true));
        }
        self.confirm_usable()?;
        let ctx = self.context()?;
        Ok((ctx.namespace().to_owned(), false))
    }

    /// validate the selected context, cluster and user
    fn confirm_usable(&self) -> Result<(), ConfigError> {
        let (context_name, _) = self.context_name();
        if !context_name.is_empty() && self.raw.context(context_name).is_none() {
            return Err(ConfigError::ContextNotFound(context_name.to_owned()));
        }

        let mut errors = Vec::new();

        let (user_name, _) = self.user_name()?;
        validate_user(&user_name, &self.user()?, &mut errors);

        let (cluster_name, _) = self.cluster_name()?;
        let cluster = self.cluster()?;
        if cluster.is_empty() {
            if errors.is_empty() {
                return Err(ConfigError::NoConfiguration);
            }
            errors.push("cluster has no server defined".to_owned());
        } else {
            validate_cluster(&cluster_name, &cluster, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    fn rest_config(&self) -> Result<RestConfig, ConfigError> {
        self.confirm_usable()?;

        let (context_name, _) = self.context_name();
        let cluster = self.cluster()?;
        let user = self.user()?;
        debug!(
            context = context_name,
            server = %cluster.server,
            "resolved kubeconfig context"
        );

        let mut config = RestConfig {
            host: cluster.server.clone(),
            proxy_url: cluster.proxy_url.clone(),
            timeout: self.overrides.timeout,
            disable_compression: self.overrides.disable_compression,
            ..Default::default()
        };

        config.tls.insecure = cluster.insecure();
        config.tls.server_name = cluster.tls_server_name.clone();
        config.tls.ca_file = non_empty(&cluster.certificate_authority).map(PathBuf::from);
        config.tls.ca_data = decode(&cluster.certificate_authority_data)?;
        config.tls.cert_file = non_empty(&user.client_certificate).map(PathBuf::from);
        config.tls.cert_data = decode(&user.client_certificate_data)?;
        config.tls.key_file = non_empty(&user.client_key).map(PathBuf::from);
        config.tls.key_data = decode_secret(&user.client_key_data)?;

        config.bearer_token = non_empty_secret(&user.token).cloned();
        if config.bearer_token.is_none() {
            config.bearer_token_file = non_empty(&user.token_file).map(PathBuf::from);
        }
        config.username = non_empty(&user.username).map(str::to_owned);
        config.password = non_empty_secret(&user.password).cloned();
        config.exec = user.exec;
        config.auth_provider = user.auth_provider;
        config.impersonate = non_empty(&user.impersonate).map(str::to_owned);
        config.impersonate_groups = user.impersonate_groups.unwrap_or_default();

        Ok(config)
    }
}

fn validate_cluster(name: &str, cluster: &ClusterDetail, errors: &mut Vec<String>) {
    if cluster.server.is_empty() {
        if name.is_empty() {
            errors.push("no server found for cluster".to_owned());
        } else {
            errors.push(format!("no server found for cluster \"{name}\""));
        }
    }
    let has_ca = non_empty(&cluster.certificate_authority).is_some()
        || non_empty(&cluster.certificate_authority_data).is_some();
    if cluster.insecure() && has_ca {
        errors.push(
            "specifying a root certificates file with the insecure flag is not allowed".to_owned(),
        );
    }
    if let Some(ca) = non_empty(&cluster.certificate_authority) {
        if let Err(err) = fs::metadata(ca) {
            errors.push(format!(
                "unable to read certificate-authority {ca} for {name} due to {err}"
            ));
        }
    }
}

fn validate_user(name: &str, user: &UserDetail, errors: &mut Vec<String>) {
    let mut methods = Vec::new();
    if non_empty_secret(&user.token).is_some() || non_empty(&user.token_file).is_some() {
        methods.push("token");
    }
    if non_empty(&user.username).is_some() || non_empty_secret(&user.password).is_some() {
        methods.push("basicAuth");
    }

    let has_cert = non_empty(&user.client_certificate).is_some()
        || non_empty(&user.client_certificate_data).is_some();
    let has_key = non_empty(&user.client_key).is_some()
        || non_empty_secret(&user.client_key_data).is_some();
    if has_cert && !has_key {
        errors.push(format!(
            "client-key-data or client-key must be specified for {name} to use the clientCert authentication method"
        ));
    }
    if has_key && !has_cert {
        errors.push(format!(
            "client-cert-data or client-cert must be specified for {name} to use the clientCert authentication method"
        ));
    }
    for path in [&user.client_certificate, &user.client_key] {
        if let Some(path) = non_empty(path) {
            if let Err(err) = fs::metadata(path) {
                errors.push(format!("unable to read {path} for {name} due to {err}"));
            }
        }
    }

    if let Some(exec) = &user.exec {
        if exec.command.is_empty() {
            errors.push(format!(
                "command must be specified for {name} to use exec authentication plugin"
            ));
        }
        if exec.api_version.is_empty() {
            errors.push(format!(
                "apiVersion must be specified for {name} to use exec authentication plugin"
            ));
        }
        if user.auth_provider.is_some() {
            errors.push(format!(
                "authProvider cannot be provided in combination with an exec plugin for {name}"
            ));
        }
    }

    if methods.len() > 1 {
        errors.push(format!(
            "more than one authentication method found for {name}; found {methods:?}, only one is allowed"
        ));
    }
}
