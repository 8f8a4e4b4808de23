use std::mem;

use clap::ArgMatches;
use clap::Command;
use tracing::debug;
use tracing::instrument;

use k8_config::ClientConfigLoader;

use crate::flags::ConfigFlags;
use crate::flags::Flag;
use crate::server_url::default_server_url;
use crate::server_url::endpoint_string;
use crate::server_url::is_config_transport_tls;
use crate::server_url::GroupVersion;
use crate::transport::transport_for;
use crate::Client;
use crate::ClientError;

/// Builds clients for api servers outside the cluster from kubeconfig and command line flags.
///
/// Register the factory before parsing, then call [`ClientFactory::client`]
/// with the parsed matches:
///
/// ```no_run
/// use clap::Command;
/// use k8_cli::ClientFactory;
///
/// let mut cmd = Command::new("tool");
/// let factory = ClientFactory::register(&mut cmd);
/// let matches = cmd.get_matches();
/// let client = factory.client(&matches).expect("client");
/// println!("{} {}", client.endpoint, client.namespace);
/// ```
#[derive(Debug, Clone)]
pub struct ClientFactory {
    flags: ConfigFlags,
}

impl ClientFactory {
    /// Attach the kubeconfig flags to `cmd`.
    ///
    /// `--cache-dir` is left out since responses are never cached on disk,
    /// `--username` and `--password` are off by default.
    pub fn register(cmd: &mut Command) -> Self {
        let flags = ConfigFlags::new().without(Flag::CacheDir);
        let owned = mem::replace(cmd, Command::new(""));
        *cmd = flags.add_flags(owned);
        Self { flags }
    }

    pub fn flags(&self) -> &ConfigFlags {
        &self.flags
    }

    /// build a client from the parsed command line
    pub fn client(&self, matches: &ArgMatches) -> Result<Client, ClientError> {
        build_client(&self.flags.to_raw_kube_config_loader(matches))
    }
}

/// resolve namespace and server config from `loader` and connect a transport to it
#[instrument(skip(loader))]
pub fn build_client(loader: &ClientConfigLoader) -> Result<Client, ClientError> {
    let (namespace, _) = loader.namespace()?;
    let config = loader.client_config()?;

    let (url, _) = default_server_url(
        &config.host,
        "",
        &GroupVersion::default(),
        is_config_transport_tls(&config),
    )?;
    let client = transport_for(&config)?;

    let endpoint = endpoint_string(&url);
    debug!(%endpoint, %namespace, "client ready");
    Ok(Client {
        endpoint,
        namespace,
        client,
    })
}
