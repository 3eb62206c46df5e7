//! Runtime configuration (spec §6 "Configuration").
//!
//! Deserialized from a TOML file via `serde`. Every key has a default
//! matching the spec table, so a partial or absent file is legal; the CLI
//! layer (`src/main.rs`) can additionally force `development_mode` on.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub worker_processes: usize,
    pub root: PathBuf,
    pub max_connections: usize,
    pub keep_alive_timeout: u64,
    pub cache_timeout: u64,
    pub cache_size: usize,
    pub development_mode: bool,
    pub log: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 7877,
            worker_processes: 4,
            root: PathBuf::from("../static"),
            max_connections: 10_000,
            keep_alive_timeout: 60,
            cache_timeout: 3600,
            cache_size: 10_000,
            development_mode: false,
            log: PathBuf::from("./logs/access.log"),
        }
    }
}

impl Config {
    /// Reads and parses `path` as TOML, falling back to built-in defaults
    /// for any key the file omits. Returns [`Error::Config`] on I/O or
    /// parse failure so `main` can surface a non-zero exit code (spec §6
    /// CLI surface).
    pub fn load(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| Error::Config { path: path.to_path_buf(), source: source.into() })?;
        toml::from_str(&raw)
            .map_err(|source| Error::Config { path: path.to_path_buf(), source: source.into() })
    }

    /// Loads `path` if it exists, otherwise returns built-in defaults — the
    /// CLI's config path argument is optional (spec §6 CLI surface).
    pub fn load_or_default(path: &Path) -> Result<Self, Error> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Applies `-d`/`--dev` by forcing development mode on regardless of
    /// what the file said.
    pub fn force_dev_mode(mut self) -> Self {
        self.development_mode = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 7877);
        assert_eq!(cfg.worker_processes, 4);
        assert_eq!(cfg.max_connections, 10_000);
        assert_eq!(cfg.keep_alive_timeout, 60);
        assert_eq!(cfg.cache_timeout, 3600);
        assert_eq!(cfg.cache_size, 10_000);
        assert!(!cfg.development_mode);
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("edgecached.toml");
        std::fs::write(&path, "port = 9000\ndevelopment_mode = true\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(cfg.development_mode);
        assert_eq!(cfg.worker_processes, 4);
    }

    #[test]
    fn missing_path_falls_back_to_defaults() {
        let cfg = Config::load_or_default(Path::new("/nonexistent/edgecached.toml")).unwrap();
        assert_eq!(cfg.port, Config::default().port);
    }
}
