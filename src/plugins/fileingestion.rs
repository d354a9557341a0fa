use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::core::error::MigrateError;
use crate::facades::FacadeBundle;
use crate::plugins::{ConfigCache, ExtraArg, PluginArgs, ServicePlugin};

pub const DISPLAY_NAME: &str = "FileIngestion";

/// Workspace record of where the captured data tree lived on the source host.
pub const ROOT_RECORD: &str = "file_store_root.txt";

/// Workspace sub-directory holding the copied data tree.
const TREE_DIR: &str = "data";

const METADATA_ONLY: &str = "metadata-only";
const CHANGE_FILE_STORE: &str = "change-file-store";

const DEFAULT_DATA_ROOT: &str = "/var/lib/gridlink/fileingestion/data";

/// File ingestion: metadata database plus the ingested file tree. The
/// metadata records carry absolute paths into the tree, so relocating the
/// store on restore rewrites those prefixes.
pub struct FileIngestionPlugin {
    data_root: PathBuf,
    config: ConfigCache,
}

impl Default for FileIngestionPlugin {
    fn default() -> Self {
        Self::with_data_root(PathBuf::from(DEFAULT_DATA_ROOT))
    }
}

impl FileIngestionPlugin {
    pub fn with_data_root(data_root: PathBuf) -> Self {
        Self {
            data_root,
            config: ConfigCache::new(),
        }
    }
}

impl ServicePlugin for FileIngestionPlugin {
    fn id(&self) -> &'static str {
        "files"
    }

    fn name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn help(&self) -> &'static str {
        "Migrate ingested files and their metadata"
    }

    fn extra_args(&self) -> Vec<ExtraArg> {
        vec![
            ExtraArg {
                name: METADATA_ONLY,
                help: "Move only the metadata database, not the file tree",
                takes_value: false,
            },
            ExtraArg {
                name: CHANGE_FILE_STORE,
                help: "On restore, relocate the file store to this root and rewrite metadata paths",
                takes_value: true,
            },
        ]
    }

    fn pre_restore_check(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        facades.db.validate_can_restore(dir, DISPLAY_NAME)?;
        if !args.flag(METADATA_ONLY) && !facades.fs.dir_exists(&dir.join(TREE_DIR)) {
            return Err(MigrateError::SourceMissing(dir.join(TREE_DIR)).into());
        }
        // Relocation needs the captured root to rewrite metadata paths from.
        if args.value(CHANGE_FILE_STORE).is_some()
            && !facades.fs.file_exists(&dir.join(ROOT_RECORD))
        {
            return Err(MigrateError::SourceMissing(dir.join(ROOT_RECORD)).into());
        }
        Ok(())
    }

    fn capture(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.capture_database(cfg, dir, DISPLAY_NAME)?;
        facades
            .fs
            .write_text_file(&dir.join(ROOT_RECORD), &self.data_root.to_string_lossy())?;

        if args.flag(METADATA_ONLY) {
            log::info!("metadata-only capture; skipping the file tree");
            return Ok(());
        }
        if facades.fs.dir_exists(&self.data_root) {
            facades
                .fs
                .copy_directory(&self.data_root, &dir.join(TREE_DIR), true)?;
        } else {
            log::warn!(
                "file store '{}' does not exist; capturing metadata only",
                self.data_root.display()
            );
        }
        Ok(())
    }

    fn restore(&self, dir: &Path, facades: &FacadeBundle, args: &PluginArgs) -> Result<()> {
        let cfg = self.config.get(facades, DISPLAY_NAME)?;
        facades.db.restore_database(cfg, dir, DISPLAY_NAME)?;

        let new_root = args.value(CHANGE_FILE_STORE).map(PathBuf::from);
        let target = new_root.clone().unwrap_or_else(|| self.data_root.clone());

        if args.flag(METADATA_ONLY) {
            log::info!("metadata-only restore; not touching the file tree");
        } else {
            facades
                .fs
                .copy_directory(&dir.join(TREE_DIR), &target, facades.force)?;
        }

        if let Some(new_root) = new_root {
            let old_root = facades.fs.read_text_file(&dir.join(ROOT_RECORD))?;
            let old_root = old_root.trim();
            let rewritten = facades.db.rewrite_path_prefix(
                cfg,
                cfg.database_name(DISPLAY_NAME),
                "metadata",
                "path",
                old_root,
                &new_root.to_string_lossy(),
            )?;
            log::info!("relocated {rewritten} metadata paths to '{}'", new_root.display());
        }
        Ok(())
    }
}
