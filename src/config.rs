//! Runner configuration.
//!
//! Flat `KEY=VALUE` file shared with the web layer. Lines starting with
//! `#` are comments. Keys ending in `_DIR` or `_EXEC` are resolved to
//! absolute paths relative to the config file's directory, so the same
//! file works from any working directory.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Cache directory used when `CACHE_DIR` is not configured.
pub const DEFAULT_CACHE_DIR: &str = "/tmp/dose3d_cache";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {0}: {1}")]
    Io(PathBuf, #[source] io::Error),

    #[error("config line {0} is not KEY=VALUE")]
    Malformed(usize),

    #[error("missing required config key {0}")]
    MissingKey(&'static str),

    #[error("{key} must be a number, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

/// Typed settings for the runner and the shared job tree.
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue root: flat `{id}.toml` / `{id}.args` / `{id}.ready` files.
    pub queue_dir: PathBuf,
    /// Running root: one subdirectory per executing job.
    pub running_dir: PathBuf,
    /// Done root: one subdirectory per finished job.
    pub done_dir: PathBuf,
    /// The Dose3D executable.
    pub exec: PathBuf,
    /// Poll interval in seconds.
    pub sleep_secs: u64,
    /// Scratch directory for post-processing caches.
    pub cache_dir: PathBuf,
}

impl Config {
    /// Load and validate settings from a flat `KEY=VALUE` file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut values: HashMap<String, String> = HashMap::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Malformed(index + 1));
            };
            let key = key.trim().to_string();
            let mut value = value.trim().to_string();
            if key.ends_with("_DIR") || key.ends_with("_EXEC") {
                value = absolutize(base, &value);
            }
            values.insert(key, value);
        }

        let require = |key: &'static str| -> Result<String, ConfigError> {
            values.get(key).cloned().ok_or(ConfigError::MissingKey(key))
        };

        let sleep_raw = require("SLEEP")?;
        let sleep_secs = sleep_raw.parse().map_err(|_| ConfigError::InvalidNumber {
            key: "SLEEP",
            value: sleep_raw.clone(),
        })?;

        Ok(Self {
            queue_dir: require("QUEUE_DIR")?.into(),
            running_dir: require("RUNNING_DIR")?.into(),
            done_dir: require("DONE_DIR")?.into(),
            exec: require("DOSE3D_EXEC")?.into(),
            sleep_secs,
            cache_dir: values
                .get("CACHE_DIR")
                .cloned()
                .unwrap_or_else(|| DEFAULT_CACHE_DIR.to_string())
                .into(),
        })
    }
}

fn absolutize(base: &Path, value: &str) -> String {
    let path = Path::new(value);
    if path.is_absolute() {
        value.to_string()
    } else {
        base.join(path).to_string_lossy().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("config.txt");
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "QUEUE_DIR=var/queue\n\
             RUNNING_DIR=var/running\n\
             DONE_DIR=var/done\n\
             DOSE3D_EXEC=bin/dose3d\n\
             SLEEP=5\n",
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.queue_dir, tmp.path().join("var/queue"));
        assert_eq!(config.exec, tmp.path().join("bin/dose3d"));
        assert_eq!(config.sleep_secs, 5);
        assert_eq!(config.cache_dir, PathBuf::from(DEFAULT_CACHE_DIR));
    }

    #[test]
    fn test_load_keeps_absolute_paths() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "QUEUE_DIR=/srv/d3d/queue\n\
             RUNNING_DIR=/srv/d3d/running\n\
             DONE_DIR=/srv/d3d/done\n\
             DOSE3D_EXEC=/usr/local/bin/dose3d\n\
             SLEEP=1\n\
             CACHE_DIR=/srv/d3d/cache\n",
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.queue_dir, PathBuf::from("/srv/d3d/queue"));
        assert_eq!(config.cache_dir, PathBuf::from("/srv/d3d/cache"));
    }

    #[test]
    fn test_comments_and_blank_lines_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "# runner settings\n\
             \n\
             QUEUE_DIR=/q\n\
             RUNNING_DIR=/r\n\
             DONE_DIR=/d\n\
             DOSE3D_EXEC=/bin/true\n\
             # SLEEP in seconds\n\
             SLEEP = 10\n",
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sleep_secs, 10);
    }

    #[test]
    fn test_missing_key_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), "QUEUE_DIR=/q\nSLEEP=1\n");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("RUNNING_DIR")));
    }

    #[test]
    fn test_sleep_must_be_numeric() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(
            tmp.path(),
            "QUEUE_DIR=/q\nRUNNING_DIR=/r\nDONE_DIR=/d\nDOSE3D_EXEC=/e\nSLEEP=soon\n",
        );

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { key: "SLEEP", .. }));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_config(tmp.path(), "QUEUE_DIR=/q\nnot a setting\n");

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(2)));
    }

    #[test]
    fn test_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(&tmp.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }
}
