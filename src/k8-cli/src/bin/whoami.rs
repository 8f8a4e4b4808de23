use clap::CommandFactory;
use clap::FromArgMatches;
use clap::Parser;
use tracing::debug;

use k8_cli::ClientFactory;

/// Print the api server and namespace selected by kubeconfig and flags
#[derive(Debug, Parser)]
#[command(name = "k8-cli-whoami", version)]
struct Args {
    /// also ask the server for its version
    #[arg(long)]
    version_check: bool,
}

fn main() -> anyhow::Result<()> {
    fluvio_future::subscriber::init_tracer(None);

    let mut cmd = Args::command();
    let factory = ClientFactory::register(&mut cmd);
    let matches = cmd.get_matches();
    let args = Args::from_arg_matches(&matches)?;
    debug!(?args, "parsed arguments");

    let client = factory.client(&matches)?;
    println!("endpoint:  {}", client.endpoint);
    println!("namespace: {}", client.namespace);

    if args.version_check {
        let version = client.server_version()?;
        println!("{}", serde_json::to_string_pretty(&version)?);
    }
    Ok(())
}
