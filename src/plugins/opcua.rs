use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::facades::FacadeBundle;
use crate::plugins::{ConfigCache, PluginArgs, ServicePlugin};

pub const DISPLAY_NAME: &str = "OpcClient";

/// Session/certificate state the OPC UA client keeps outside its database.
const STATE_FILE: &str = "client_state.json";
const DEFAULT_DATA_DIR: &str = "/var/lib/gridlink/opcclient";

/// OPC UA client: logical database plus one on-disk state file.
pub struct OpcClientPlugin {
    data_dir: PathBuf,
    config: ConfigCache,
}

impl Default for OpcClientPlugin {
    fn default() -> Self {
        Self::with_data_dir(PathBuf::from(DEFAULT_DATA_DIR))
    }
}

impl OpcClientPlugin {
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            config: ConfigCache::new(),
        }
    }
}

impl ServicePlugin for OpcClientPlugin {
    fn id(&self) -> &'static str {
        "opcua"
    }

    fn name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn help(&self) -> &'static str {
        "Migrate OPC UA client sessions and certificates"
    }

    fn capture(&self, dir: &Path, facades: &FacadeBundle, _args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.capture_database(cfg, dir, DISPLAY_NAME)?;

        let state = self.data_dir.join(STATE_FILE);
        if facades.fs.file_exists(&state) {
            facades.fs.copy_file(&state, dir)?;
        } else {
            log::warn!("no client state at '{}'; nothing extra to capture", state.display());
        }
        Ok(())
    }

    fn restore(&self, dir: &Path, facades: &FacadeBundle, _args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.restore_database(cfg, dir, DISPLAY_NAME)?;

        let state = dir.join(STATE_FILE);
        if facades.fs.file_exists(&state) {
            facades.fs.copy_file(&state, &self.data_dir)?;
        }
        Ok(())
    }
}
