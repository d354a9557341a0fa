pub mod fs;
pub mod process;
pub mod service;

use std::path::PathBuf;

use crate::db::engine::{DatabaseEngine, MongoToolsEngine};
use fs::{DiskFileSystem, FileSystem};
use process::{ProcessRunner, SystemProcessRunner};
use service::{ServiceControl, ServiceManagerClient};

const DEFAULT_CONFIG_DIR: &str = "/etc/gridlink/config";
const CONFIG_DIR_ENV: &str = "GRIDLINK_CONFIG_DIR";

/// The external-system adapters handed to the orchestrator and every plugin,
/// constructed once in the entry point.
pub struct FacadeBundle {
    pub process: Box<dyn ProcessRunner>,
    pub fs: Box<dyn FileSystem>,
    pub db: Box<dyn DatabaseEngine>,
    pub services: Box<dyn ServiceControl>,
    /// Directory holding the per-service `<DisplayName>.json` files.
    pub config_dir: PathBuf,
    /// Operator `--force`: destructive restores and directory overwrites.
    pub force: bool,
}

impl FacadeBundle {
    pub fn production(force: bool) -> Self {
        Self {
            process: Box::new(SystemProcessRunner),
            fs: Box::new(DiskFileSystem),
            db: Box::new(MongoToolsEngine::new(
                Box::new(SystemProcessRunner),
                Box::new(DiskFileSystem),
                force,
            )),
            services: Box::new(ServiceManagerClient::new()),
            config_dir: default_config_dir(),
            force,
        }
    }
}

pub fn default_config_dir() -> PathBuf {
    std::env::var(CONFIG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR))
}
