use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::WagateConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["wagate.toml", "wagate.yaml", "wagate.yml", "wagate.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<WagateConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&substitute_env(&raw), path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./wagate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/wagate/wagate.{toml,yaml,yml,json}` (user-global)
///
/// Returns `WagateConfig::default()` if no config file is found or the file
/// cannot be parsed.
pub fn discover_and_load() -> WagateConfig {
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
    WagateConfig::default()
}

/// Load an explicit config file when one is given, otherwise discover one.
/// Environment overrides are applied on top in both cases.
pub fn load_or_discover(explicit: Option<&Path>) -> Result<WagateConfig> {
    let mut config = match explicit {
        Some(path) => load_config(path)?,
        None => discover_and_load(),
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    Ok(config)
}

/// Returns the user-global config directory (`~/.config/wagate/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "wagate").map(|d| d.config_dir().to_path_buf())
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Apply deployment-level environment variables on top of file config.
///
/// `PORT` and `WEBHOOK_URL` are honoured unprefixed since that is how most
/// container platforms inject them.
pub fn apply_env_overrides(config: &mut WagateConfig, lookup: impl Fn(&str) -> Option<String>) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(port) = non_empty("PORT").and_then(|v| parse_or_warn::<u16>("PORT", &v)) {
        config.server.port = port;
    }
    if let Some(bind) = non_empty("WAGATE_BIND") {
        config.server.bind = bind;
    }
    if let Some(url) = non_empty("WEBHOOK_URL") {
        config.webhook.url = Some(url);
    }
    if let Some(secret) = non_empty("WEBHOOK_SECRET") {
        config.webhook.secret = Some(Secret::new(secret));
    }
    if let Some(profile) = non_empty("WAGATE_DEFAULT_PROFILE") {
        config.sessions.default_profile = profile;
    }
    if let Some(dir) = non_empty("WAGATE_SIDECAR_DIR") {
        config.sidecar.dir = Some(PathBuf::from(dir));
    }
    if let Some(port) = non_empty("WAGATE_SIDECAR_PORT")
        .and_then(|v| parse_or_warn::<u16>("WAGATE_SIDECAR_PORT", &v))
    {
        config.sidecar.port = port;
    }
}

fn parse_or_warn<T: std::str::FromStr>(name: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(name, value, "ignoring invalid environment override");
            None
        },
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<WagateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        other => Err(Error::UnsupportedFormat(other.to_string())),
    }
}

/// Render a config as pretty TOML (secrets included, so keep it off logs).
pub fn to_toml(config: &WagateConfig) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
