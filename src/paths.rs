//! Application path resolution
//!
//! The config file is looked up in this order:
//!
//! - an explicit `--config` path,
//! - `twister-sync.yaml` in the current working directory (development),
//! - `<config dir>/twister-sync/config.yaml` from `dirs::config_dir()`.
//!
//! Logs go next to a working-directory config, otherwise into the per-user
//! data directory.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name under the per-user config/data directories
const APP_DIR: &str = "twister-sync";

/// Config file name looked up in the working directory
const CWD_CONFIG: &str = "twister-sync.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Path to the configuration file (may not exist)
    pub config: PathBuf,
    /// Directory for rolling log files
    pub logs_dir: PathBuf,
    /// Where downloaded presets are written by default
    pub downloads_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths from the environment.
    ///
    /// Called before logging is initialized.
    pub fn detect(explicit_config: Option<PathBuf>) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::resolve(
            explicit_config,
            &cwd,
            dirs::config_dir(),
            dirs::data_dir(),
            dirs::download_dir(),
        )
    }

    fn resolve(
        explicit_config: Option<PathBuf>,
        cwd: &Path,
        config_dir: Option<PathBuf>,
        data_dir: Option<PathBuf>,
        download_dir: Option<PathBuf>,
    ) -> Self {
        let downloads_dir = download_dir.unwrap_or_else(|| cwd.to_path_buf());
        let data_logs = data_dir.map(|d| d.join(APP_DIR).join("logs"));

        if let Some(config) = explicit_config {
            let logs_dir = data_logs.unwrap_or_else(|| Self::sibling_logs(&config, cwd));
            return Self {
                config,
                logs_dir,
                downloads_dir,
            };
        }

        let cwd_config = cwd.join(CWD_CONFIG);
        if cwd_config.exists() {
            return Self {
                config: cwd_config,
                logs_dir: cwd.join("logs"),
                downloads_dir,
            };
        }

        let config = config_dir
            .map(|d| d.join(APP_DIR).join("config.yaml"))
            .unwrap_or(cwd_config);
        let logs_dir = data_logs.unwrap_or_else(|| cwd.join("logs"));
        Self {
            config,
            logs_dir,
            downloads_dir,
        }
    }

    fn sibling_logs(config: &Path, cwd: &Path) -> PathBuf {
        config
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(cwd)
            .join("logs")
    }

    /// Create the logs directory if it is missing
    pub fn ensure_logs_dir(&self) -> std::io::Result<&Path> {
        if !self.logs_dir.exists() {
            debug!("Creating logs directory: {}", self.logs_dir.display());
            std::fs::create_dir_all(&self.logs_dir)?;
        }
        Ok(&self.logs_dir)
    }

    /// Target path for a downloaded preset; only the file name of `name` is used
    pub fn download_target(&self, name: &str) -> PathBuf {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "preset.json".into());
        self.downloads_dir.join(file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_config_wins() {
        let cwd = TempDir::new().unwrap();
        std::fs::write(cwd.path().join(CWD_CONFIG), "").unwrap();

        let paths = AppPaths::resolve(
            Some(PathBuf::from("/etc/twister.yaml")),
            cwd.path(),
            Some(PathBuf::from("/home/u/.config")),
            Some(PathBuf::from("/home/u/.local/share")),
            None,
        );
        assert_eq!(paths.config, PathBuf::from("/etc/twister.yaml"));
        assert_eq!(
            paths.logs_dir,
            PathBuf::from("/home/u/.local/share/twister-sync/logs")
        );
        assert_eq!(paths.downloads_dir, cwd.path());
    }

    #[test]
    fn test_cwd_config_used_for_development() {
        let cwd = TempDir::new().unwrap();
        std::fs::write(cwd.path().join(CWD_CONFIG), "").unwrap();

        let paths = AppPaths::resolve(None, cwd.path(), None, None, None);
        assert_eq!(paths.config, cwd.path().join(CWD_CONFIG));
        assert_eq!(paths.logs_dir, cwd.path().join("logs"));
    }

    #[test]
    fn test_user_config_dir_fallback() {
        let cwd = TempDir::new().unwrap();
        let paths = AppPaths::resolve(
            None,
            cwd.path(),
            Some(PathBuf::from("/cfg")),
            Some(PathBuf::from("/data")),
            Some(PathBuf::from("/dl")),
        );
        assert_eq!(paths.config, PathBuf::from("/cfg/twister-sync/config.yaml"));
        assert_eq!(paths.logs_dir, PathBuf::from("/data/twister-sync/logs"));
        assert_eq!(
            paths.download_target("../../evil/live.json"),
            PathBuf::from("/dl/live.json")
        );
    }

    #[test]
    fn test_ensure_logs_dir_creates_directory() {
        let cwd = TempDir::new().unwrap();
        let paths = AppPaths::resolve(None, cwd.path(), None, None, None);
        assert!(!paths.logs_dir.exists());
        paths.ensure_logs_dir().unwrap();
        assert!(paths.logs_dir.is_dir());
    }
}
