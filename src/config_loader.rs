use crate::config::Config;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration file '{}'", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration file '{}'", config_path.display()))?;

    config.validate()?;

    Ok(config)
}

/// Load the configuration file if one was given, defaults otherwise
pub fn load_or_default(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => load_config(path),
        None => {
            info!("No configuration file given, using defaults");
            Ok(Config::default())
        }
    }
}

/// CLI arguments that override YAML settings
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub nodes: Option<usize>,
    pub max_connections: Option<usize>,
    pub payments: Option<usize>,
    pub seed: Option<u64>,
    pub workdir: Option<PathBuf>,
    pub keep_workdir: bool,
}

/// Apply CLI overrides to a configuration
pub fn apply_overrides(config: &mut Config, overrides: &CliOverrides) -> Result<()> {
    if let Some(nodes) = overrides.nodes {
        info!("Overriding node count: {}", nodes);
        config.network.nodes = nodes;
        if let Some(aliases) = &config.network.aliases {
            if aliases.len() < nodes {
                warn!(
                    "Configured alias list has {} entries, falling back to generated aliases for {} nodes",
                    aliases.len(),
                    nodes
                );
                config.network.aliases = None;
            }
        }
    }

    if let Some(max_connections) = overrides.max_connections {
        info!("Overriding max connections per node: {}", max_connections);
        config.network.max_connections_per_node = max_connections;
    }

    if let Some(payments) = overrides.payments {
        info!("Overriding activity payment count: {}", payments);
        config.activity.payments = payments;
    }

    if let Some(seed) = overrides.seed {
        config.general.seed = Some(seed);
    }

    if let Some(workdir) = &overrides.workdir {
        config.general.workdir = workdir.clone();
    }

    if overrides.keep_workdir {
        config.general.keep_workdir = true;
    }

    // Re-validate after applying overrides
    config.validate()?;

    Ok(())
}

/// Expand a leading `~` in the work directory to the user's home directory
pub fn resolve_workdir(workdir: &Path) -> Result<PathBuf> {
    let raw = workdir.to_string_lossy();
    if let Some(rest) = raw.strip_prefix('~') {
        let home = std::env::var("HOME").wrap_err("Cannot determine home directory")?;
        let rest = rest.trim_start_matches('/');
        Ok(PathBuf::from(home).join(rest))
    } else {
        Ok(workdir.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let yaml = r#"
network:
  nodes: 5
  max_connections_per_node: 2
activity:
  payments: 10
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.network.nodes, 5);
        assert_eq!(config.activity.payments, 10);
    }

    #[test]
    fn test_load_invalid_config() {
        let yaml = r#"
network:
  nodes: 1
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = Config::default();
        config.network.aliases = Some(vec!["Alice".into(), "Bob".into(), "Carol".into()]);

        let overrides = CliOverrides {
            nodes: Some(6),
            max_connections: Some(4),
            payments: Some(25),
            seed: Some(99),
            workdir: Some(PathBuf::from("/tmp/elsewhere")),
            keep_workdir: true,
        };

        apply_overrides(&mut config, &overrides).unwrap();
        assert_eq!(config.network.nodes, 6);
        assert!(config.network.aliases.is_none(), "short alias list is dropped");
        assert_eq!(config.network.max_connections_per_node, 4);
        assert_eq!(config.activity.payments, 25);
        assert_eq!(config.general.seed, Some(99));
        assert_eq!(config.general.workdir, PathBuf::from("/tmp/elsewhere"));
        assert!(config.general.keep_workdir);
    }

    #[test]
    fn test_overrides_are_validated() {
        let mut config = Config::default();
        let overrides = CliOverrides {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(apply_overrides(&mut config, &overrides).is_err());
    }

    #[test]
    fn test_resolve_workdir() {
        let absolute = resolve_workdir(Path::new("/var/tmp/lndev")).unwrap();
        assert_eq!(absolute, PathBuf::from("/var/tmp/lndev"));

        if let Ok(home) = std::env::var("HOME") {
            let expanded = resolve_workdir(Path::new("~/.lndev")).unwrap();
            assert_eq!(expanded, PathBuf::from(home).join(".lndev"));
        }
    }
}
