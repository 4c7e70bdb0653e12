use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::LibraryError;

pub const CONFIG_VERSION: u32 = 2;

pub const DEFAULT_MUSIC_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "m4a", "aac", "wav", "aiff", "wma", "ape", "mpc", "wv",
];

pub const DEFAULT_PLAYLIST_EXTENSIONS: &[&str] = &["m3u", "m3u8"];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    pub version: u32,
    pub catalog_path: String,
    /// Use the file modification time as discovery date of new tracks.
    pub force_file_date: bool,
    /// Write tag changes immediately; when off they queue until
    /// `Collection::flush_tag_writes`.
    pub autocommit_tags: bool,
    pub hide_unmounted: bool,
    pub skip_hidden: bool,
    /// `None` follows the platform: case-insensitive on Windows and macOS.
    pub case_insensitive_paths: Option<bool>,
    pub music_extensions: Vec<String>,
    pub playlist_extensions: Vec<String>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            catalog_path: "catalog.redb".to_string(),
            force_file_date: false,
            autocommit_tags: true,
            hide_unmounted: false,
            skip_hidden: true,
            case_insensitive_paths: None,
            music_extensions: DEFAULT_MUSIC_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            playlist_extensions: DEFAULT_PLAYLIST_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl CollectionConfig {
    pub fn case_insensitive(&self) -> bool {
        self.case_insensitive_paths
            .unwrap_or(cfg!(any(windows, target_os = "macos")))
    }

    pub fn is_playlist_extension(&self, ext: &str) -> bool {
        self.playlist_extensions
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("MUSIC_CATALOG_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(CollectionConfig, bool), LibraryError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: CollectionConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.catalog_path.trim().is_empty() {
            config.catalog_path = "catalog.redb".to_string();
        }
        normalize_extensions(&mut config.music_extensions, DEFAULT_MUSIC_EXTENSIONS);
        normalize_extensions(&mut config.playlist_extensions, DEFAULT_PLAYLIST_EXTENSIONS);
        return Ok((config, false));
    }

    let config = CollectionConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &CollectionConfig) -> Result<(), LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

fn normalize_extensions(list: &mut Vec<String>, defaults: &[&str]) {
    let mut out: Vec<String> = Vec::new();
    for ext in list.iter() {
        let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
        if !ext.is_empty() && !out.contains(&ext) {
            out.push(ext);
        }
    }
    if out.is_empty() {
        out = defaults.iter().map(|ext| ext.to_string()).collect();
    }
    *list = out;
}
