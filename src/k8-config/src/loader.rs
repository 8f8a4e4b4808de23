use std::env;
use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;

use crate::ConfigError;
use crate::KubeConfig;

pub const KUBECONFIG: &str = "KUBECONFIG";

/// Where kubeconfig files are read from.
///
/// An explicit path must exist. Without one, every existing file of the
/// precedence list is merged, earlier files winning over later ones.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct LoadingRules {
    pub explicit_path: Option<PathBuf>,
    pub precedence: Vec<PathBuf>,
}

impl LoadingRules {
    /// precedence taken from `KUBECONFIG`, or `~/.kube/config` if not set
    pub fn from_env() -> Self {
        Self::from_kubeconfig_var(env::var_os(KUBECONFIG))
    }

    pub fn from_kubeconfig_var(value: Option<OsString>) -> Self {
        let mut precedence: Vec<PathBuf> = Vec::new();
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            for path in env::split_paths(&value) {
                if path.as_os_str().is_empty() || precedence.contains(&path) {
                    continue;
                }
                precedence.push(path);
            }
        } else if let Some(home) = KubeConfig::home_path() {
            precedence.push(home);
        }

        Self {
            explicit_path: None,
            precedence,
        }
    }

    pub fn with_explicit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    /// load and merge, an empty config means nothing was found
    pub fn load(&self) -> Result<KubeConfig, ConfigError> {
        if let Some(path) = &self.explicit_path {
            debug!("loading explicit kubeconfig: {}", path.display());
            return read(path);
        }

        let mut merged = KubeConfig::default();
        for path in &self.precedence {
            if !path.exists() {
                debug!("kubeconfig {} does not exist, skipping", path.display());
                continue;
            }
            debug!("loading kubeconfig: {}", path.display());
            let config = read(path)?;
            if merged.path.as_os_str().is_empty() {
                merged.path = config.path.clone();
            }
            merged.merge(config);
        }

        Ok(merged)
    }
}

fn read(path: &Path) -> Result<KubeConfig, ConfigError> {
    let mut config = KubeConfig::from_file(path)?;
    if let Some(dir) = path.parent() {
        config.resolve_paths(dir);
    }
    Ok(config)
}

#[cfg(test)]
mod test {

    use std::env;
    use std::path::PathBuf;

    use super::LoadingRules;

    #[test]
    fn test_kubeconfig_var_split() {
        let joined = env::join_paths(["/a/config", "", "/b/config", "/a/config"]).expect("join");
        let rules = LoadingRules::from_kubeconfig_var(Some(joined));
        assert_eq!(
            rules.precedence,
            vec![PathBuf::from("/a/config"), PathBuf::from("/b/config")]
        );
        assert!(rules.explicit_path.is_none());
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let rules = LoadingRules::default().with_explicit_path("data/missing-kubeconfig");
        assert!(rules.load().is_err());
    }

    #[test]
    fn test_missing_precedence_files_skipped() {
        let rules = LoadingRules {
            explicit_path: None,
            precedence: vec![
                PathBuf::from("data/missing-kubeconfig"),
                PathBuf::from("data/k8config.yaml"),
                PathBuf::from("data/plugins.yaml"),
            ],
        };
        let config = rules.load().expect("load");
        assert_eq!(config.current_context, "flv");
        assert!(config.cluster("minikube").is_some());
        assert!(config.cluster("eks").is_some());
        assert_eq!(config.path, PathBuf::from("data/k8config.yaml"));
    }

    #[test]
    fn test_nothing_found_is_empty() {
        let rules = LoadingRules {
            explicit_path: None,
            precedence: vec![PathBuf::from("data/missing-kubeconfig")],
        };
        assert!(rules.load().expect("load").is_empty());
    }
}
