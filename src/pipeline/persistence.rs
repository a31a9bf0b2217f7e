// Reading and writing song files and the transport config.
// The full song document lives elsewhere; this is just enough to drive the
// transport from disk.
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::config::TransportConfig;
use crate::pipeline::song::Song;

const BARLINE_DIR: &str = ".barline";
const CONFIG_FILE: &str = "config.json";

// <project_dir>/.barline/config.json
fn config_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(BARLINE_DIR).join(CONFIG_FILE)
}

// Missing or unreadable config means defaults
pub fn load_config(project_dir: &Path) -> TransportConfig {
    let path = config_file_path(project_dir);
    let Ok(data) = std::fs::read_to_string(&path) else {
        return TransportConfig::default();
    };
    match serde_json::from_str(&data) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("ignoring {}: {e}", path.display());
            TransportConfig::default()
        }
    }
}

pub fn save_config(project_dir: &Path, config: &TransportConfig) -> anyhow::Result<()> {
    let path = config_file_path(project_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?; // create .barline/ if needed
    }
    std::fs::write(&path, serde_json::to_string_pretty(config)?)?;
    Ok(())
}

// Songs are rejected up front if the timeline maths can't trust them
pub fn load_song(path: &Path) -> anyhow::Result<Song> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let song: Song = serde_json::from_str(&data)
        .with_context(|| format!("parsing {}", path.display()))?;
    song.validate()
        .with_context(|| format!("validating {}", path.display()))?;
    Ok(song)
}

pub fn save_song(path: &Path, song: &Song) -> anyhow::Result<()> {
    song.validate()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(song)?)?;
    Ok(())
}
