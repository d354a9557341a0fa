use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::facades::FacadeBundle;
use crate::plugins::{ConfigCache, PluginArgs, ServicePlugin};

pub const DISPLAY_NAME: &str = "TagHistorian";

/// Logical database the historian wrote into before the routing fix; the
/// `thdbbug` verb merges it back into the configured database.
pub const MISROUTED_SOURCE_DB: &str = "admin";

/// In-memory store snapshot that travels alongside the database archive.
pub const SNAPSHOT_FILE: &str = "dump.rdb";

const DEFAULT_DATA_DIR: &str = "/var/lib/gridlink/taghistorian";

/// Tag historian: logical database plus the in-memory store snapshot file.
pub struct TagHistorianPlugin {
    data_dir: PathBuf,
    config: ConfigCache,
}

impl Default for TagHistorianPlugin {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from(DEFAULT_DATA_DIR))
    }
}

impl TagHistorianPlugin {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            config: ConfigCache::new(),
        }
    }
}

impl ServicePlugin for TagHistorianPlugin {
    fn id(&self) -> &'static str {
        "tag"
    }

    fn name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn help(&self) -> &'static str {
        "Migrate tag history and the current-value snapshot"
    }

    fn capture(&self, dir: &Path, facades: &FacadeBundle, _args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.capture_database(cfg, dir, DISPLAY_NAME)?;

        let snapshot = self.data_dir.join(SNAPSHOT_FILE);
        if facades.fs.file_exists(&snapshot) {
            facades.fs.copy_file(&snapshot, dir)?;
        } else {
            log::warn!(
                "no current-value snapshot at '{}'; capturing history only",
                snapshot.display()
            );
        }
        Ok(())
    }

    fn restore(&self, dir: &Path, facades: &FacadeBundle, _args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.restore_database(cfg, dir, DISPLAY_NAME)?;

        let snapshot = dir.join(SNAPSHOT_FILE);
        if facades.fs.file_exists(&snapshot) {
            facades.fs.copy_file(&snapshot, &self.data_dir)?;
        } else {
            log::warn!("workspace has no '{SNAPSHOT_FILE}'; restoring history only");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::engine::archive_path;
    use crate::testutil::{install_service, stub_facades, StubOptions};
    use std::fs;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, TagHistorianPlugin) {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join("historian");
        fs::create_dir_all(&data_dir).unwrap();
        (tmp, TagHistorianPlugin::with_data_dir(data_dir))
    }

    #[test]
    fn test_capture_includes_snapshot_file() {
        let (tmp, plugin) = fixture();
        let config_dir = tmp.path().join("config");
        install_service(&config_dir, DISPLAY_NAME);
        fs::write(plugin.data_dir.join(SNAPSHOT_FILE), "rdb").unwrap();
        let (facades, _) = stub_facades(&config_dir, StubOptions::default());

        let dir = tmp.path().join("ws").join(DISPLAY_NAME);
        plugin.capture(&dir, &facades, &PluginArgs::default()).unwrap();

        assert!(archive_path(&dir, DISPLAY_NAME).is_file());
        assert_eq!(fs::read_to_string(dir.join(SNAPSHOT_FILE)).unwrap(), "rdb");
    }

    #[test]
    fn test_capture_without_snapshot_is_a_warning_not_an_error() {
        let (tmp, plugin) = fixture();
        let config_dir = tmp.path().join("config");
        install_service(&config_dir, DISPLAY_NAME);
        let (facades, _) = stub_facades(&config_dir, StubOptions::default());

        let dir = tmp.path().join("ws").join(DISPLAY_NAME);
        plugin.capture(&dir, &facades, &PluginArgs::default()).unwrap();
        assert!(!dir.join(SNAPSHOT_FILE).exists());
    }

    #[test]
    fn test_restore_puts_snapshot_back() {
        let (tmp, plugin) = fixture();
        let config_dir = tmp.path().join("config");
        install_service(&config_dir, DISPLAY_NAME);
        let (facades, _) = stub_facades(&config_dir, StubOptions::default());

        let dir = tmp.path().join("ws").join(DISPLAY_NAME);
        fs::create_dir_all(&dir).unwrap();
        fs::write(archive_path(&dir, DISPLAY_NAME), "gz").unwrap();
        fs::write(dir.join(SNAPSHOT_FILE), "rdb").unwrap();

        plugin.restore(&dir, &facades, &PluginArgs::default()).unwrap();
        assert_eq!(
            fs::read_to_string(plugin.data_dir.join(SNAPSHOT_FILE)).unwrap(),
            "rdb"
        );
    }
}
