//! Binary path resolution and validation utilities.
//!
//! This module handles resolving binary paths from shorthand names or explicit paths,
//! and validating that binaries exist and are executable.

use std::env;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::config::BinaryConfig;

/// Errors that can occur during binary resolution or validation
#[derive(Debug, thiserror::Error)]
pub enum BinaryError {
    #[error("Binary not found: {path}")]
    NotFound { path: String },

    #[error("Binary is not executable: {path}")]
    NotExecutable { path: String },

    #[error("Cannot determine home directory")]
    NoHomeDir,

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Fully resolved paths of every external program a run needs
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedBinaries {
    pub bitcoind: PathBuf,
    pub bitcoin_cli: PathBuf,
    pub lnd: PathBuf,
}

/// Get the user's home directory from the HOME environment variable
fn get_home_dir() -> Result<PathBuf, BinaryError> {
    env::var("HOME")
        .map(PathBuf::from)
        .map_err(|_| BinaryError::NoHomeDir)
}

/// Resolve a binary path from a shorthand name or explicit path.
///
/// Resolution rules:
/// 1. If path contains `/` or starts with `~`: treat as explicit path
/// 2. Otherwise: search each directory of `PATH` for the name
///
/// # Examples
///
/// ```ignore
/// resolve_binary_path("lnd") -> /usr/local/bin/lnd (first PATH hit)
/// resolve_binary_path("~/go/bin/lnd") -> /home/user/go/bin/lnd
/// resolve_binary_path("/opt/bitcoin/bin/bitcoind") -> /opt/bitcoin/bin/bitcoind
/// ```
pub fn resolve_binary_path(name_or_path: &str) -> Result<PathBuf, BinaryError> {
    if name_or_path.is_empty() {
        return Err(BinaryError::InvalidPath {
            path: name_or_path.to_string(),
        });
    }

    if let Some(rest) = name_or_path.strip_prefix('~') {
        let home_dir = get_home_dir()?;
        return Ok(home_dir.join(rest.trim_start_matches('/')));
    }

    if name_or_path.contains('/') {
        return Ok(PathBuf::from(name_or_path));
    }

    let search_path = env::var_os("PATH").unwrap_or_default();
    env::split_paths(&search_path)
        .map(|dir| dir.join(name_or_path))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| BinaryError::NotFound {
            path: name_or_path.to_string(),
        })
}

/// Validate that a binary exists and is executable.
///
/// This should be called at startup before launching any process to catch
/// configuration errors early.
pub fn validate_binary(path: &Path) -> Result<(), BinaryError> {
    if !path.exists() {
        return Err(BinaryError::NotFound {
            path: path.display().to_string(),
        });
    }

    let metadata = path.metadata().map_err(|_| BinaryError::InvalidPath {
        path: path.display().to_string(),
    })?;

    // Check if file is executable (any execute bit set)
    let mode = metadata.permissions().mode();
    if !metadata.is_file() || mode & 0o111 == 0 {
        return Err(BinaryError::NotExecutable {
            path: path.display().to_string(),
        });
    }

    Ok(())
}

/// Validate a binary specified by name or path.
///
/// Combines resolution and validation in one step.
pub fn validate_binary_spec(name_or_path: &str) -> Result<PathBuf, BinaryError> {
    let resolved = resolve_binary_path(name_or_path)?;
    validate_binary(&resolved)?;
    Ok(resolved)
}

/// Resolve and validate every configured binary
pub fn resolve_binaries(config: &BinaryConfig) -> Result<ResolvedBinaries, BinaryError> {
    Ok(ResolvedBinaries {
        bitcoind: validate_binary_spec(&config.bitcoind)?,
        bitcoin_cli: validate_binary_spec(&config.bitcoin_cli)?,
        lnd: validate_binary_spec(&config.lnd)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_file(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(mode);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[test]
    fn test_resolve_explicit_tilde() {
        if env::var("HOME").is_err() {
            return;
        }
        let result = resolve_binary_path("~/.local/bin/lnd").unwrap();
        assert!(result.ends_with(".local/bin/lnd"));
        assert!(!result.starts_with("~"));
    }

    #[test]
    fn test_resolve_explicit_absolute() {
        let result = resolve_binary_path("/opt/bitcoin/bin/bitcoind").unwrap();
        assert_eq!(result, PathBuf::from("/opt/bitcoin/bin/bitcoind"));
    }

    #[test]
    fn test_resolve_empty_name() {
        assert!(matches!(resolve_binary_path(""), Err(BinaryError::InvalidPath { .. })));
    }

    #[test]
    fn test_resolve_unknown_shorthand() {
        let result = resolve_binary_path("lndev-no-such-binary-anywhere");
        assert!(matches!(result, Err(BinaryError::NotFound { .. })));
    }

    #[test]
    fn test_validate_binary() {
        let dir = tempfile::tempdir().unwrap();
        let exec = make_file(dir.path(), "lnd", 0o755);
        let plain = make_file(dir.path(), "notes.txt", 0o644);

        assert!(validate_binary(&exec).is_ok());
        assert!(matches!(validate_binary(&plain), Err(BinaryError::NotExecutable { .. })));
        assert!(matches!(
            validate_binary(&dir.path().join("missing")),
            Err(BinaryError::NotFound { .. })
        ));
        assert!(matches!(validate_binary(dir.path()), Err(BinaryError::NotExecutable { .. })));
    }

    #[test]
    fn test_resolve_binaries_explicit_paths() {
        let dir = tempfile::tempdir().unwrap();
        let bitcoind = make_file(dir.path(), "bitcoind", 0o755);
        let cli = make_file(dir.path(), "bitcoin-cli", 0o755);
        let lnd = make_file(dir.path(), "lnd", 0o755);

        let config = BinaryConfig {
            bitcoind: bitcoind.display().to_string(),
            bitcoin_cli: cli.display().to_string(),
            lnd: lnd.display().to_string(),
        };
        let resolved = resolve_binaries(&config).unwrap();
        assert_eq!(resolved.lnd, lnd);
        assert_eq!(resolved.bitcoin_cli, cli);
    }
}
