use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::error::MigrateError;
use crate::facades::FacadeBundle;
use crate::plugins::{ConfigCache, ExtraArg, PluginArgs, ServicePlugin};

pub const DISPLAY_NAME: &str = "PackageRepository";

const TREE_DIR: &str = "packages";
const METADATA_ONLY: &str = "metadata-only";
const DEFAULT_DATA_ROOT: &str = "/var/lib/gridlink/repository/packages";

/// Package repository: feed database plus the stored package tree.
pub struct PackageRepositoryPlugin {
    data_root: PathBuf,
    config: ConfigCache,
}

impl Default for PackageRepositoryPlugin {
    fn default() -> Self {
        Self::with_data_root(PathBuf::from(DEFAULT_DATA_ROOT))
    }
}

impl PackageRepositoryPlugin {
    pub fn with_data_root(data_root: PathBuf) -> Self {
        Self {
            data_root,
            config: ConfigCache::new(),
        }
    }
}

impl ServicePlugin for PackageRepositoryPlugin {
    fn id(&self) -> &'static str {
        "repo"
    }

    fn name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn help(&self) -> &'static str {
        "Migrate package feeds and stored packages"
    }

    fn extra_args(&self) -> Vec<ExtraArg> {
        vec![ExtraArg {
            name: METADATA_ONLY,
            help: "Move only the feed database, not the stored packages",
            takes_value: false,
        }]
    }

    fn pre_restore_check(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        facades.db.validate_can_restore(dir, DISPLAY_NAME)?;
        if !args.flag(METADATA_ONLY) && !facades.fs.dir_exists(&dir.join(TREE_DIR)) {
            return Err(MigrateError::SourceMissing(dir.join(TREE_DIR)).into());
        }
        Ok(())
    }

    fn capture(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.capture_database(cfg, dir, DISPLAY_NAME)?;

        if args.flag(METADATA_ONLY) {
            log::info!("metadata-only capture; skipping stored packages");
            return Ok(());
        }
        if facades.fs.dir_exists(&self.data_root) {
            facades
                .fs
                .copy_directory(&self.data_root, &dir.join(TREE_DIR), true)?;
        } else {
            log::warn!(
                "package store '{}' does not exist; capturing feeds only",
                self.data_root.display()
            );
        }
        Ok(())
    }

    fn restore(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.restore_database(cfg, dir, DISPLAY_NAME)?;

        if args.flag(METADATA_ONLY) {
            log::info!("metadata-only restore; not touching stored packages");
            return Ok(());
        }
        facades
            .fs
            .copy_directory(&dir.join(TREE_DIR), &self.data_root, facades.force)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{install_service, stub_facades, StubOptions};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_package_tree() {
        let tmp = TempDir::new().unwrap();
        let data_root = tmp.path().join("pkgs");
        fs::create_dir_all(data_root.join("feed-a")).unwrap();
        fs::write(data_root.join("feed-a/pkg.ipk"), "pkg").unwrap();
        let config_dir = tmp.path().join("config");
        install_service(&config_dir, DISPLAY_NAME);
        let plugin = PackageRepositoryPlugin::with_data_root(data_root.clone());

        let (facades, _) = stub_facades(&config_dir, StubOptions::default());
        let dir = tmp.path().join("ws").join(DISPLAY_NAME);
        plugin.capture(&dir, &facades, &PluginArgs::default()).unwrap();
        assert!(dir.join(TREE_DIR).join("feed-a/pkg.ipk").is_file());

        fs::remove_dir_all(&data_root).unwrap();
        plugin.restore(&dir, &facades, &PluginArgs::default()).unwrap();
        assert_eq!(
            fs::read_to_string(data_root.join("feed-a/pkg.ipk")).unwrap(),
            "pkg"
        );
    }

    #[test]
    fn test_metadata_only_skips_the_tree() {
        let tmp = TempDir::new().unwrap();
        let data_root = tmp.path().join("pkgs");
        fs::create_dir_all(&data_root).unwrap();
        let config_dir = tmp.path().join("config");
        install_service(&config_dir, DISPLAY_NAME);
        let plugin = PackageRepositoryPlugin::with_data_root(data_root);

        let (facades, log) = stub_facades(
            &config_dir,
            StubOptions {
                deny_tree_copy: true,
                ..Default::default()
            },
        );
        let dir = tmp.path().join("ws").join(DISPLAY_NAME);
        let mut args = PluginArgs::default();
        args.set_flag(METADATA_ONLY);
        plugin.capture(&dir, &facades, &args).unwrap();
        plugin.restore(&dir, &facades, &args).unwrap();
        assert_eq!(log.count("copy_directory"), 0);
    }
}
