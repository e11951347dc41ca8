use crate::model::Settings;
use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

const APP_DIR: &str = "artic";
const SETTINGS_FILE: &str = "settings.json";
const STATS_FILE: &str = "stats.json";

pub fn config_root() -> Result<PathBuf> {
    if let Ok(override_dir) = env::var("ARTIC_CONFIG_DIR") {
        return Ok(PathBuf::from(override_dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

pub fn settings_path() -> Result<PathBuf> {
    Ok(config_root()?.join(SETTINGS_FILE))
}

pub fn stats_path() -> Result<PathBuf> {
    Ok(config_root()?.join(STATS_FILE))
}

pub fn ensure_config_dir() -> Result<PathBuf> {
    let root = config_root()?;
    fs::create_dir_all(&root).with_context(|| format!("failed to create {}", root.display()))?;
    Ok(root)
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path()?)
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    ensure_config_dir()?;
    save_settings_to_path(&settings_path()?, settings)
}

pub(crate) fn load_settings_from_path(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {}", path.display()))?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Ok(settings),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "settings file is malformed, using defaults");
            quarantine_file(path);
            Ok(Settings::default())
        }
    }
}

pub(crate) fn save_settings_to_path(path: &Path, settings: &Settings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings)?;
    write_atomically(path, json.as_bytes())
}

/// Moves an unreadable file aside as `<name>.corrupt-<epoch ms>` so later
/// saves never overwrite it.
pub(crate) fn quarantine_file(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy().into_owned();
    let mut stamp = crate::stats::now_epoch_ms();
    let mut target = path.with_file_name(format!("{name}.corrupt-{stamp}"));
    while target.exists() {
        stamp += 1;
        target = path.with_file_name(format!("{name}.corrupt-{stamp}"));
    }

    match fs::rename(path, &target) {
        Ok(()) => {
            warn!(from = %path.display(), to = %target.display(), "kept unreadable file");
            Some(target)
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to move unreadable file aside");
            None
        }
    }
}

/// Writes through a sibling temp file and renames it over `path`, so a
/// crash mid-write leaves the previous contents intact.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy()
        .into_owned();
    let temp = path.with_file_name(format!("{name}.tmp"));
    fs::write(&temp, bytes).with_context(|| format!("failed to write {}", temp.display()))?;
    fs::rename(&temp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

pub fn normalize_path(path: &Path) -> PathBuf {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    strip_windows_verbatim_prefix(&canonical)
}

pub fn strip_windows_verbatim_prefix(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();

    if let Some(trimmed) = raw.strip_prefix(r"\\?\UNC\") {
        return PathBuf::from(format!(r"\\{trimmed}"));
    }

    if let Some(trimmed) = raw.strip_prefix(r"\\?\") {
        return PathBuf::from(trimmed);
    }

    path.to_path_buf()
}
