use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::error::MigrateError;
use crate::facades::FacadeBundle;
use crate::plugins::{ConfigCache, ExtraArg, PluginArgs, ServicePlugin};

pub const DISPLAY_NAME: &str = "SystemsManagement";

/// Encrypted bundle name inside the workspace sub-directory.
pub const BUNDLE_FILE: &str = "pki";

const SECRET: &str = "secret";
const DEFAULT_PKI_DIR: &str = "/var/lib/gridlink/pki";

/// Systems management: fleet database plus the PKI material tree, which only
/// ever leaves the host inside a secret-protected bundle.
pub struct SystemsManagementPlugin {
    pki_dir: PathBuf,
    config: ConfigCache,
}

impl Default for SystemsManagementPlugin {
    fn default() -> Self {
        Self::with_pki_dir(PathBuf::from(DEFAULT_PKI_DIR))
    }
}

impl SystemsManagementPlugin {
    pub fn with_pki_dir(pki_dir: PathBuf) -> Self {
        Self {
            pki_dir,
            config: ConfigCache::new(),
        }
    }

    fn secret<'a>(&self, args: &'a PluginArgs) -> Result<&'a str, MigrateError> {
        args.value(SECRET).ok_or_else(|| {
            MigrateError::ArgumentMisuse(
                "--systems-secret is required to protect the PKI bundle".into(),
            )
        })
    }
}

impl ServicePlugin for SystemsManagementPlugin {
    fn id(&self) -> &'static str {
        "systems"
    }

    fn name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn help(&self) -> &'static str {
        "Migrate managed-fleet state and PKI material"
    }

    fn extra_args(&self) -> Vec<ExtraArg> {
        vec![ExtraArg {
            name: SECRET,
            help: "Secret protecting the PKI bundle; required for capture and restore",
            takes_value: true,
        }]
    }

    fn pre_capture_check(&self, _dir: &Path, _facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        self.secret(args)?;
        Ok(())
    }

    fn pre_restore_check(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        self.secret(args)?;
        facades.db.validate_can_restore(dir, DISPLAY_NAME)?;
        let bundle = dir.join(BUNDLE_FILE);
        if !facades.fs.file_exists(&bundle) {
            return Err(MigrateError::SourceMissing(bundle).into());
        }
        Ok(())
    }

    fn capture(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        let secret = self.secret(args)?;
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.capture_database(cfg, dir, DISPLAY_NAME)?;
        facades
            .fs
            .copy_directory_to_encrypted_file(&self.pki_dir, &dir.join(BUNDLE_FILE), secret)?;
        Ok(())
    }

    fn restore(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        let secret = self.secret(args)?;
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.restore_database(cfg, dir, DISPLAY_NAME)?;
        facades.fs.copy_directory_from_encrypted_file(
            &dir.join(BUNDLE_FILE),
            &self.pki_dir,
            secret,
            facades.force,
        )?;
        Ok(())
    }
}
