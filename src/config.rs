#![forbid(unsafe_code)]

//! Runtime settings for the proxy: fetch timing knobs plus the listen address
//! for the frontend binary. Values resolve in the usual order of explicit
//! override, process environment, `.env` file, compiled default.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

/// Per-attempt connect timeout. Kept short relative to the total budget so
/// several mirrors can be probed within one request.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 5_000;
/// Wall-clock budget for one whole failover pass across all candidates.
pub const DEFAULT_TOTAL_BUDGET_MS: u64 = 10_000;
/// Headroom kept at the end of the budget: no attempt starts unless at least
/// this much of the budget remains.
pub const DEFAULT_ATTEMPT_RESERVE_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub total_budget: Duration,
    pub attempt_reserve: Duration,
    /// Optional TOML file overriding the compiled-in mirror lists.
    pub instances_file: Option<PathBuf>,
    pub host: String,
    pub port: u16,
}

pub fn load_runtime_settings() -> Result<RuntimeSettings> {
    resolve_runtime_settings(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub instances_file: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let millis = |key: &str, default: u64| -> Duration {
        let value = lookup_value(key, file_vars, &env_lookup)
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(default);
        Duration::from_millis(value)
    };
    let connect_timeout = millis("MIRRORVIEW_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS);
    let read_timeout = millis("MIRRORVIEW_READ_TIMEOUT_MS", DEFAULT_READ_TIMEOUT_MS);
    let total_budget = millis("MIRRORVIEW_TOTAL_BUDGET_MS", DEFAULT_TOTAL_BUDGET_MS);
    let attempt_reserve = millis("MIRRORVIEW_ATTEMPT_RESERVE_MS", DEFAULT_ATTEMPT_RESERVE_MS);
    let instances_file = overrides.instances_file.or_else(|| {
        lookup_value("MIRRORVIEW_INSTANCES_FILE", file_vars, &env_lookup).map(PathBuf::from)
    });
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup_value("MIRRORVIEW_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("MIRRORVIEW_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    Ok(RuntimeSettings {
        connect_timeout,
        read_timeout,
        total_budget,
        attempt_reserve,
        instances_file,
        host,
        port,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None).unwrap()
    }

    #[test]
    fn load_runtime_settings_applies_defaults() {
        let settings = settings_from("");
        assert_eq!(settings.connect_timeout, Duration::from_millis(3_000));
        assert_eq!(settings.read_timeout, Duration::from_millis(5_000));
        assert_eq!(settings.total_budget, Duration::from_millis(10_000));
        assert_eq!(settings.attempt_reserve, Duration::from_millis(1_000));
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.port, DEFAULT_PORT);
        assert!(settings.instances_file.is_none());
    }

    #[test]
    fn load_runtime_settings_reads_timing_knobs() {
        let settings = settings_from(
            "MIRRORVIEW_CONNECT_TIMEOUT_MS=\"250\"\nMIRRORVIEW_TOTAL_BUDGET_MS=2000\n",
        );
        assert_eq!(settings.connect_timeout, Duration::from_millis(250));
        assert_eq!(settings.total_budget, Duration::from_millis(2_000));
        assert_eq!(settings.read_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn load_runtime_settings_invalid_numbers_default() {
        let settings =
            settings_from("MIRRORVIEW_PORT=\"nope\"\nMIRRORVIEW_READ_TIMEOUT_MS=abc\n");
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.read_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn build_runtime_settings_prefers_env_over_file() {
        let vars = read_env_file(make_config("MIRRORVIEW_HOST=\"file-host\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |key| {
            if key == "MIRRORVIEW_HOST" {
                Some("env-host".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(settings.host, "env-host");
    }

    #[test]
    fn build_runtime_settings_override_precedence() {
        let mut vars = HashMap::new();
        vars.insert("MIRRORVIEW_HOST".to_string(), "file-host".to_string());
        vars.insert("MIRRORVIEW_PORT".to_string(), "7000".to_string());

        let overrides = RuntimeOverrides {
            instances_file: Some(PathBuf::from("/etc/mirrors.toml")),
            host: Some("override-host".into()),
            port: Some(9000),
            env_path: None,
        };

        let settings = build_runtime_settings_with_overrides(
            &vars,
            |key| {
                if key == "MIRRORVIEW_PORT" {
                    Some("8000".to_string())
                } else {
                    None
                }
            },
            overrides,
        )
        .unwrap();

        assert_eq!(settings.host, "override-host");
        assert_eq!(settings.port, 9000);
        assert_eq!(
            settings.instances_file,
            Some(PathBuf::from("/etc/mirrors.toml"))
        );
    }

    #[test]
    fn build_runtime_settings_ignores_blank_host() {
        let vars = read_env_file(make_config("").path()).unwrap();
        let settings = build_runtime_settings_with_overrides(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.host, DEFAULT_HOST);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export MIRRORVIEW_HOST="0.0.0.0"
            MIRRORVIEW_PORT='9090'
            MIRRORVIEW_INSTANCES_FILE =  /etc/mirrors.toml
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("MIRRORVIEW_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("MIRRORVIEW_PORT").unwrap(), "9090");
        assert_eq!(
            vars.get("MIRRORVIEW_INSTANCES_FILE").unwrap(),
            "/etc/mirrors.toml"
        );
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
