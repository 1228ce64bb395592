use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{env_subst::substitute_env, schema::SyncConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["sync.toml", "sync.yaml", "sync.yml", "sync.json"];

/// Load config from the given path (any supported format), with
/// `${ENV_VAR}` substitution applied to the raw text before parsing.
pub fn load_config(path: &Path) -> anyhow::Result<SyncConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./sync.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/sync-server/sync.{toml,yaml,yml,json}` (user-global)
///
/// Returns `SyncConfig::default()` if no config file is found or the one
/// found fails to load.
pub fn discover_and_load() -> SyncConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    SyncConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "sync-server") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

/// Returns the user-global config directory (`~/.config/sync-server/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "sync-server").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<SyncConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_with_env_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.toml");
        unsafe {
            std::env::set_var("SYNC_TEST_ADDR", "127.0.0.1:9999");
        }
        std::fs::write(&path, "[listen]\naddr = \"${SYNC_TEST_ADDR}\"\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.listen.addr, "127.0.0.1:9999");
    }

    #[test]
    fn loads_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.yaml");
        std::fs::write(&path, "heartbeat:\n  interval_ms: 5000\n").unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.heartbeat.interval_ms, 5000);
    }

    #[test]
    fn discover_and_load_falls_back_to_default_without_a_file() {
        let original = std::env::current_dir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();
        let cfg = discover_and_load();
        std::env::set_current_dir(original).unwrap();
        assert_eq!(cfg.listen.addr, SyncConfig::default().listen.addr);
    }
}
