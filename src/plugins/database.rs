use std::path::Path;

use anyhow::Result;

use crate::facades::FacadeBundle;
use crate::plugins::{ConfigCache, PluginArgs, ServicePlugin};

/// A service whose whole state lives in its logical database.
pub struct DatabasePlugin {
    id: &'static str,
    name: &'static str,
    help: &'static str,
    config: ConfigCache,
}

impl DatabasePlugin {
    pub const fn new(id: &'static str, name: &'static str, help: &'static str) -> Self {
        Self {
            id,
            name,
            help,
            config: ConfigCache::new(),
        }
    }
}

impl ServicePlugin for DatabasePlugin {
    fn id(&self) -> &'static str {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn help(&self) -> &'static str {
        self.help
    }

    fn capture(&self, dir: &Path, facades: &FacadeBundle, _args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, self.name)?;
        facades.db.capture_database(cfg, dir, self.name)?;
        Ok(())
    }

    fn restore(&self, dir: &Path, facades: &FacadeBundle, _args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, self.name)?;
        facades.db.restore_database(cfg, dir, self.name)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::engine::archive_path;
    use crate::testutil::{install_service, stub_facades, StubOptions};
    use tempfile::TempDir;

    #[test]
    fn test_capture_produces_named_archive() {
        let tmp = TempDir::new().unwrap();
        let config_dir = tmp.path().join("config");
        install_service(&config_dir, "TestMonitor");
        let (facades, log) = stub_facades(&config_dir, StubOptions::default());

        let plugin = DatabasePlugin::new("testmonitor", "TestMonitor", "help");
        let dir = tmp.path().join("ws/TestMonitor");
        plugin.capture(&dir, &facades, &PluginArgs::default()).unwrap();

        let archive = archive_path(&dir, "TestMonitor");
        assert!(archive.is_file());
        assert!(archive.metadata().unwrap().len() > 0);
        assert_eq!(log.count("capture_db:TestMonitor"), 1);
    }

    #[test]
    fn test_restore_pre_check_needs_archive() {
        let tmp = TempDir::new().unwrap();
        let config_dir = tmp.path().join("config");
        install_service(&config_dir, "TestMonitor");
        let (facades, _) = stub_facades(&config_dir, StubOptions::default());

        let plugin = DatabasePlugin::new("testmonitor", "TestMonitor", "help");
        let dir = tmp.path().join("ws/TestMonitor");
        let err = plugin
            .pre_restore_check(&dir, &facades, &PluginArgs::default())
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<crate::MigrateError>(),
            Some(crate::MigrateError::ArchiveMissing(_))
        ));
    }

    #[test]
    fn test_installed_probe_is_the_config_file() {
        let tmp = TempDir::new().unwrap();
        let config_dir = tmp.path().join("config");
        std::fs::create_dir_all(&config_dir).unwrap();
        let (facades, _) = stub_facades(&config_dir, StubOptions::default());

        let plugin = DatabasePlugin::new("testmonitor", "TestMonitor", "help");
        assert!(!plugin.is_installed(&facades));
        install_service(&config_dir, "TestMonitor");
        assert!(plugin.is_installed(&facades));
    }
}
