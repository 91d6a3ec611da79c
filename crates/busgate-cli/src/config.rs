//! Gateway config file – reads/writes `~/.busgate/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use busgate_kernel::{ModuleSpec, SupervisorConfig};
use busgate_types::GatewayError;
use serde::{Deserialize, Serialize};

/// Everything the gateway needs to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Modules to load, in order.
    #[serde(default = "default_modules")]
    pub modules: Vec<ModuleSpec>,
}

fn default_modules() -> Vec<ModuleSpec> {
    vec![ModuleSpec::new("log"), ModuleSpec::new("virtual_switch")]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            supervisor: SupervisorConfig::default(),
            modules: default_modules(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.busgate/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".busgate").join("config.toml")
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save
// ─────────────────────────────────────────────────────────────────────────────

/// Load the config at `path`, with environment overrides applied.
/// `Ok(None)` when the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, GatewayError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let mut cfg: Config = toml::from_str(&raw)
        .map_err(|e| GatewayError::Config(format!("{}: {e}", path.display())))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `BUSGATE_*` environment variable overrides to `cfg`.
/// Values that do not parse as milliseconds are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `BUSGATE_POLL_TIMEOUT_MS` | `supervisor.poll_timeout_ms` |
/// | `BUSGATE_IDLE_BACKOFF_MS` | `supervisor.idle_backoff_ms` |
/// | `BUSGATE_RETRY_BACKOFF_MS` | `supervisor.retry_backoff_ms` |
/// | `BUSGATE_STOP_GRACE_MS` | `supervisor.stop_grace_ms` |
pub fn apply_env_overrides(cfg: &mut Config) {
    let overrides = [
        ("BUSGATE_POLL_TIMEOUT_MS", &mut cfg.supervisor.poll_timeout_ms),
        ("BUSGATE_IDLE_BACKOFF_MS", &mut cfg.supervisor.idle_backoff_ms),
        ("BUSGATE_RETRY_BACKOFF_MS", &mut cfg.supervisor.retry_backoff_ms),
        ("BUSGATE_STOP_GRACE_MS", &mut cfg.supervisor.stop_grace_ms),
    ];
    for (var, field) in overrides {
        if let Ok(v) = std::env::var(var)
            && let Ok(ms) = v.trim().parse::<u64>()
        {
            *field = ms;
        }
    }
}

/// Write `cfg` to `path`, creating the parent directory. Owner-only
/// permissions on Unix.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), GatewayError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| GatewayError::Config(format!("failed to serialize config: {e}")))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use busgate_types::ModuleKind;

    #[test]
    fn config_path_points_to_busgate_dir() {
        let p = config_path_for_home("/home/operator");
        assert_eq!(p, PathBuf::from("/home/operator/.busgate/config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");
        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.modules, default_modules());
        assert_eq!(loaded.supervisor.poll_timeout_ms, 1_000);
    }

    #[test]
    fn parses_module_entries() {
        let raw = r#"
            [supervisor]
            retry_backoff_ms = 250

            [[modules]]
            module = "console"

            [[modules]]
            module = "virtual_switch"
            id = "lights"
            kind = "interface"
            [modules.config]
            switches = ["porch", "hall"]
        "#;
        let cfg: Config = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.supervisor.retry_backoff_ms, 250);
        assert_eq!(cfg.supervisor.stop_grace_ms, 10_000);
        assert_eq!(cfg.modules.len(), 2);
        let lights = &cfg.modules[1];
        assert_eq!(lights.id(), "lights");
        assert_eq!(lights.kind, Some(ModuleKind::Interface));
        assert_eq!(
            lights.config["switches"].as_array().map(|a| a.len()),
            Some(2)
        );
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "modules = 3").expect("write");
        assert!(matches!(load_from(&path), Err(GatewayError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        save_to(&Config::default(), &path).expect("save");

        let file_mode = std::fs::metadata(&path).expect("file").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .expect("dir")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        // SAFETY: the only test touching these variables.
        unsafe {
            std::env::set_var("BUSGATE_STOP_GRACE_MS", "2500");
            std::env::set_var("BUSGATE_RETRY_BACKOFF_MS", "soon");
        }
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.supervisor.stop_grace_ms, 2_500);
        assert_eq!(cfg.supervisor.retry_backoff_ms, 500);
        unsafe {
            std::env::remove_var("BUSGATE_STOP_GRACE_MS");
            std::env::remove_var("BUSGATE_RETRY_BACKOFF_MS");
        }
    }
}
