//! homebridge-nest config file: read, merge and write the `googleAuth` block.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const PLATFORM: &str = "Nest";
const GOOGLE_AUTH_KEY: &str = "googleAuth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleAuth {
    #[serde(rename = "issueToken")]
    pub issue_token: String,
    pub cookies: String,
}

#[derive(Serialize)]
struct PluginConfig<'a> {
    platform: &'a str,
    #[serde(rename = "googleAuth")]
    google_auth: &'a GoogleAuth,
}

/// Read the config object. `Ok(None)` when the file does not exist.
pub fn read_config_file(path: &Path) -> anyhow::Result<Option<Map<String, Value>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file does not exist");
            return Ok(None);
        }
        Err(e) => return Err(e).with_context(|| format!("read config {:?}", path)),
    };
    let value: Value =
        serde_json::from_str(&content).with_context(|| format!("parse config {:?}", path))?;
    match value {
        Value::Object(map) => Ok(Some(map)),
        other => anyhow::bail!(
            "config {:?} must contain a JSON object, found {}",
            path,
            json_kind(&other)
        ),
    }
}

/// Overwrite the file with a fresh `{platform, googleAuth}` object.
pub fn write_config_file(auth: &GoogleAuth, path: &Path) -> anyhow::Result<()> {
    let config = PluginConfig {
        platform: PLATFORM,
        google_auth: auth,
    };
    let content = serde_json::to_string_pretty(&config).context("serialize config")?;
    write_file(path, &content)?;
    tracing::info!(path = %path.display(), "wrote authentication data");
    Ok(())
}

/// Replace only `googleAuth` in an existing config, keeping every other key and
/// its position. Creates a fresh config when the file does not exist.
pub fn update_config_auth(auth: &GoogleAuth, path: &Path) -> anyhow::Result<()> {
    let auth_value = serde_json::to_value(auth).context("serialize googleAuth")?;
    let updated = match read_config_file(path)? {
        Some(mut existing) => {
            existing.insert(GOOGLE_AUTH_KEY.to_string(), auth_value);
            existing
        }
        None => {
            let mut fresh = Map::new();
            fresh.insert("platform".to_string(), Value::String(PLATFORM.to_string()));
            fresh.insert(GOOGLE_AUTH_KEY.to_string(), auth_value);
            fresh
        }
    };
    let content =
        serde_json::to_string_pretty(&Value::Object(updated)).context("serialize config")?;
    write_file(path, &content)?;
    tracing::info!(path = %path.display(), "updated authentication data");
    Ok(())
}

/// The stored `googleAuth`, if the file exists and carries one.
pub fn read_google_auth(path: &Path) -> anyhow::Result<Option<GoogleAuth>> {
    let Some(mut config) = read_config_file(path)? else {
        return Ok(None);
    };
    match config.remove(GOOGLE_AUTH_KEY) {
        Some(v) => {
            let auth = serde_json::from_value(v)
                .with_context(|| format!("invalid googleAuth in {:?}", path))?;
            Ok(Some(auth))
        }
        None => Ok(None),
    }
}

fn write_file(path: &Path, content: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create config dir {:?}", parent))?;
    }
    std::fs::write(path, content).with_context(|| format!("write config {:?}", path))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
