// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the aqua-regulator project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration loading and reload probing
//!
//! Loading never fails: a missing file produces a default template on disk,
//! and an unparsable file logs the error and keeps the defaults. The manager
//! remembers the file's modification time so the supervisor can cheaply
//! probe for external edits.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, error, warn};

use super::Config;

/// Owns the parsed [`Config`] and the path it came from.
pub struct ConfigManager {
    config: Config,
    path: PathBuf,
    last_write: Option<SystemTime>,
}

impl ConfigManager {
    /// Load the configuration at `path`, creating a default template there
    /// if the file does not exist.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let mut manager = Self {
            config: Config::default(),
            path: path.as_ref().to_path_buf(),
            last_write: None,
        };
        manager.load_from_disk();
        manager
    }

    pub fn get(&self) -> &Config {
        &self.config
    }

    /// Re-parse the file when its modification time has changed since the
    /// last load. Returns whether a reload happened.
    pub fn reload_if_changed(&mut self) -> bool {
        let modified = match fs::metadata(&self.path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };

        if self.last_write != Some(modified) {
            debug!("configuration file changed on disk, reloading");
            self.load_from_disk();
            self.last_write = Some(modified);
            return true;
        }
        false
    }

    fn load_from_disk(&mut self) {
        if !self.path.exists() {
            self.write_default_template();
            self.config = Config::default();
            return;
        }

        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                self.config = parse_or_default(&contents);
            }
            Err(err) => {
                error!(
                    "failed to read configuration file {:?}: {err}. Using defaults",
                    self.path
                );
                self.config = Config::default();
            }
        }

        self.last_write = fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok();
    }

    fn write_default_template(&mut self) {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(err) = fs::create_dir_all(parent) {
                    error!("failed to create configuration directory: {err}");
                    return;
                }
            }
        }

        let template = match serde_json::to_string_pretty(&Config::default()) {
            Ok(json) => json,
            Err(err) => {
                error!("failed to render default configuration: {err}");
                return;
            }
        };

        match fs::write(&self.path, template) {
            Ok(()) => {
                warn!(
                    "configuration file missing. A default template was created at {:?}",
                    self.path
                );
                self.last_write = fs::metadata(&self.path)
                    .and_then(|meta| meta.modified())
                    .ok();
            }
            Err(err) => error!("failed to write default configuration template: {err}"),
        }
    }
}

fn parse_or_default(contents: &str) -> Config {
    match serde_json::from_str(contents) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to parse configuration. Using defaults. Error: {err}");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn missing_file_produces_a_template_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("app_config.json");

        let manager = ConfigManager::new(&path);
        assert_eq!(manager.get().publisher.port, 5555);

        let written = fs::read_to_string(&path).unwrap();
        let template: Config = serde_json::from_str(&written).unwrap();
        assert_eq!(template.sensor.registers, 6);
    }

    #[test]
    fn malformed_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        fs::write(&path, "{not json").unwrap();

        let manager = ConfigManager::new(&path);
        assert_eq!(manager.get().pipeline.cache_size, 120);
    }

    #[test]
    fn reload_detects_a_rewritten_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        fs::write(&path, r#"{"video": {"port": 7000}}"#).unwrap();

        let mut manager = ConfigManager::new(&path);
        assert_eq!(manager.get().video.port, 7000);
        assert!(!manager.reload_if_changed());

        // A touch alone is not enough on coarse-mtime filesystems, so spin
        // until the rewritten file carries a different timestamp.
        let before = fs::metadata(&path).unwrap().modified().unwrap();
        loop {
            let mut file = fs::File::create(&path).unwrap();
            file.write_all(br#"{"video": {"port": 7001}}"#).unwrap();
            drop(file);
            if fs::metadata(&path).unwrap().modified().unwrap() != before {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        assert!(manager.reload_if_changed());
        assert_eq!(manager.get().video.port, 7001);
    }

    #[test]
    fn reload_is_a_noop_when_the_file_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        fs::write(&path, "{}").unwrap();

        let mut manager = ConfigManager::new(&path);
        fs::remove_file(&path).unwrap();
        assert!(!manager.reload_if_changed());
    }
}
