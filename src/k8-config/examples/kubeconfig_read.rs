use k8_config::ClientConfigLoader;
use k8_config::ConfigOverrides;
use k8_config::LoadingRules;

fn main() {
    // Read the KUBECONFIG env var for paths, or attempt to open $HOME/.kube/config
    // Merge them, then resolve the current context

    fluvio_future::subscriber::init_tracer(None);
    let loader = ClientConfigLoader::new(LoadingRules::from_env(), ConfigOverrides::default());

    let raw = loader.raw_config().expect("Load failed");
    println!("{raw:#?}");

    match loader.namespace() {
        Ok((namespace, _)) => println!("namespace: {namespace}"),
        Err(err) => println!("namespace: {err}"),
    }

    match loader.client_config() {
        Ok(config) => println!("{config:#?}"),
        Err(err) => println!("config: {err}"),
    }
}
