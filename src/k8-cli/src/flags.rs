use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Arg;
use clap::ArgAction;
use clap::ArgMatches;
use clap::Command;
use secrecy::SecretString;

use k8_config::ClientConfigLoader;
use k8_config::ConfigOverrides;
use k8_config::LoadingRules;

const ENV_PREFIX: &str = "K8_";

/// Standard kubectl configuration flags
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Flag {
    KubeConfig,
    CacheDir,
    CertificateAuthority,
    ClientCertificate,
    ClientKey,
    BearerToken,
    Impersonate,
    ImpersonateGroup,
    Username,
    Password,
    ClusterName,
    AuthInfoName,
    Context,
    Namespace,
    ApiServer,
    TlsServerName,
    Insecure,
    Timeout,
    DisableCompression,
}

impl Flag {
    pub const ALL: [Flag; 19] = [
        Flag::KubeConfig,
        Flag::CacheDir,
        Flag::CertificateAuthority,
        Flag::ClientCertificate,
        Flag::ClientKey,
        Flag::BearerToken,
        Flag::Impersonate,
        Flag::ImpersonateGroup,
        Flag::Username,
        Flag::Password,
        Flag::ClusterName,
        Flag::AuthInfoName,
        Flag::Context,
        Flag::Namespace,
        Flag::ApiServer,
        Flag::TlsServerName,
        Flag::Insecure,
        Flag::Timeout,
        Flag::DisableCompression,
    ];

    /// long option name, also used as the clap argument id
    pub fn long(&self) -> &'static str {
        match self {
            Self::KubeConfig => "kubeconfig",
            Self::CacheDir => "cache-dir",
            Self::CertificateAuthority => "certificate-authority",
            Self::ClientCertificate => "client-certificate",
            Self::ClientKey => "client-key",
            Self::BearerToken => "token",
            Self::Impersonate => "as",
            Self::ImpersonateGroup => "as-group",
            Self::Username => "username",
            Self::Password => "password",
            Self::ClusterName => "cluster",
            Self::AuthInfoName => "user",
            Self::Context => "context",
            Self::Namespace => "namespace",
            Self::ApiServer => "server",
            Self::TlsServerName => "tls-server-name",
            Self::Insecure => "insecure-skip-tls-verify",
            Self::Timeout => "request-timeout",
            Self::DisableCompression => "disable-compression",
        }
    }

    fn env(&self) -> String {
        format!("{ENV_PREFIX}{}", self.long().replace('-', "_").to_uppercase())
    }

    fn help(&self) -> &'static str {
        match self {
            Self::KubeConfig => "Path to the kubeconfig file to use for CLI requests",
            Self::CacheDir => "Default cache directory",
            Self::CertificateAuthority => "Path to a cert file for the certificate authority",
            Self::ClientCertificate => "Path to a client certificate file for TLS",
            Self::ClientKey => "Path to a client key file for TLS",
            Self::BearerToken => "Bearer token for authentication to the API server",
            Self::Impersonate => "Username to impersonate for the operation",
            Self::ImpersonateGroup => {
                "Group to impersonate for the operation, this flag can be repeated to specify multiple groups"
            }
            Self::Username => "Username for basic authentication to the API server",
            Self::Password => "Password for basic authentication to the API server",
            Self::ClusterName => "The name of the kubeconfig cluster to use",
            Self::AuthInfoName => "The name of the kubeconfig user to use",
            Self::Context => "The name of the kubeconfig context to use",
            Self::Namespace => "If present, the namespace scope for this CLI request",
            Self::ApiServer => "The address and port of the Kubernetes API server",
            Self::TlsServerName => {
                "Server name for server certificate validation. The value is kept in the resolved config, but this client always validates against the hostname used to contact the server"
            }
            Self::Insecure => {
                "If true, the server's certificate will not be checked for validity. This will make your HTTPS connections insecure"
            }
            Self::Timeout => {
                "The length of time to wait before giving up on a single server request. Non-zero values should contain a corresponding time unit (e.g. 1s, 2m, 3h). A value of zero means don't timeout requests"
            }
            Self::DisableCompression => {
                "If true, opt-out of response compression for all requests to the server"
            }
        }
    }

    fn arg(&self) -> Arg {
        let arg = Arg::new(self.long())
            .long(self.long())
            .help(self.help())
            .env(self.env())
            .global(true);

        match self {
            Self::Namespace => arg.short('n').value_name("NAMESPACE"),
            Self::ApiServer => arg.short('s').value_name("SERVER"),
            Self::KubeConfig | Self::CacheDir => arg
                .value_name("PATH")
                .value_parser(clap::value_parser!(PathBuf)),
            Self::CertificateAuthority | Self::ClientCertificate | Self::ClientKey => {
                arg.value_name("PATH")
            }
            Self::ImpersonateGroup => arg.value_name("GROUP").action(ArgAction::Append),
            Self::Insecure | Self::DisableCompression => arg.action(ArgAction::SetTrue),
            Self::Timeout => arg
                .value_name("DURATION")
                .default_value("0")
                .value_parser(parse_timeout),
            _ => arg,
        }
    }
}

/// Parse a request timeout: `0`, a bare number of seconds, or units like `1m30s`
pub fn parse_timeout(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if value.is_empty() {
        return Err("empty duration".to_owned());
    }
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|err| format!("invalid duration {value:?}: {err}"))
}

/// Set of configuration flags, each of which can be switched off before registering.
///
/// Username and password are off by default.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConfigFlags {
    enabled: BTreeSet<Flag>,
}

impl Default for ConfigFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFlags {
    pub fn new() -> Self {
        Self::all()
            .without(Flag::Username)
            .without(Flag::Password)
    }

    pub fn all() -> Self {
        Self {
            enabled: Flag::ALL.iter().copied().collect(),
        }
    }

    pub fn with(mut self, flag: Flag) -> Self {
        self.enabled.insert(flag);
        self
    }

    pub fn without(mut self, flag: Flag) -> Self {
        self.enabled.remove(&flag);
        self
    }

    pub fn is_enabled(&self, flag: Flag) -> bool {
        self.enabled.contains(&flag)
    }

    pub fn flags(&self) -> impl Iterator<Item = Flag> + '_ {
        self.enabled.iter().copied()
    }

    /// register enabled flags on `cmd`, in declaration order
    pub fn add_flags(&self, cmd: Command) -> Command {
        Flag::ALL
            .iter()
            .filter(|flag| self.is_enabled(**flag))
            .fold(cmd, |cmd, flag| cmd.arg(flag.arg()))
    }

    fn string(&self, matches: &ArgMatches, flag: Flag) -> Option<String> {
        if !self.is_enabled(flag) {
            return None;
        }
        matches
            .try_get_one::<String>(flag.long())
            .ok()
            .flatten()
            .filter(|v| !v.is_empty())
            .cloned()
    }

    fn bool(&self, matches: &ArgMatches, flag: Flag) -> bool {
        self.is_enabled(flag)
            && matches
                .try_get_one::<bool>(flag.long())
                .ok()
                .flatten()
                .copied()
                .unwrap_or(false)
    }

    pub fn kubeconfig(&self, matches: &ArgMatches) -> Option<PathBuf> {
        if !self.is_enabled(Flag::KubeConfig) {
            return None;
        }
        matches
            .try_get_one::<PathBuf>(Flag::KubeConfig.long())
            .ok()
            .flatten()
            .filter(|p| !p.as_os_str().is_empty())
            .cloned()
    }

    pub fn loading_rules(&self, matches: &ArgMatches) -> LoadingRules {
        let rules = LoadingRules::from_env();
        match self.kubeconfig(matches) {
            Some(path) => rules.with_explicit_path(path),
            None => rules,
        }
    }

    /// command line values as kubeconfig overrides
    pub fn overrides(&self, matches: &ArgMatches) -> ConfigOverrides {
        let impersonate_groups = if self.is_enabled(Flag::ImpersonateGroup) {
            matches
                .try_get_many::<String>(Flag::ImpersonateGroup.long())
                .ok()
                .flatten()
                .map(|groups| groups.cloned().collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let timeout = if self.is_enabled(Flag::Timeout) {
            matches
                .try_get_one::<Duration>(Flag::Timeout.long())
                .ok()
                .flatten()
                .copied()
                .filter(|t| !t.is_zero())
        } else {
            None
        };

        ConfigOverrides {
            context: self.string(matches, Flag::Context),
            cluster: self.string(matches, Flag::ClusterName),
            user: self.string(matches, Flag::AuthInfoName),
            namespace: self.string(matches, Flag::Namespace),
            server: self.string(matches, Flag::ApiServer),
            tls_server_name: self.string(matches, Flag::TlsServerName),
            certificate_authority: self.string(matches, Flag::CertificateAuthority),
            insecure_skip_tls_verify: self.bool(matches, Flag::Insecure).then_some(true),
            client_certificate: self.string(matches, Flag::ClientCertificate),
            client_key: self.string(matches, Flag::ClientKey),
            token: self.string(matches, Flag::BearerToken).map(SecretString::from),
            impersonate: self.string(matches, Flag::Impersonate),
            impersonate_groups,
            username: self.string(matches, Flag::Username),
            password: self.string(matches, Flag::Password).map(SecretString::from),
            timeout,
            disable_compression: self.bool(matches, Flag::DisableCompression),
        }
    }

    /// loader over kubeconfig files and the parsed flags
    pub fn to_raw_kube_config_loader(&self, matches: &ArgMatches) -> ClientConfigLoader {
        ClientConfigLoader::new(self.loading_rules(matches), self.overrides(matches))
    }
}
