//! Shared stub facades for unit tests, in the spirit of a stub backend:
//! they record every call and fake the external world on local disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::core::error::MigrateError;
use crate::db::config::ServiceConfig;
use crate::db::engine::{archive_path, DatabaseEngine};
use crate::db::merge::MergeReport;
use crate::facades::fs::{DiskFileSystem, FileSystem};
use crate::facades::process::{ProcessOutput, ProcessRunner};
use crate::facades::service::ServiceControl;
use crate::facades::FacadeBundle;

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }
}

pub struct StubRunner {
    pub log: CallLog,
}

impl ProcessRunner for StubRunner {
    fn run_with_allowed_codes(
        &self,
        argv: &[String],
        _allowed: &[i32],
    ) -> Result<ProcessOutput, MigrateError> {
        self.log.push(format!("run:{}", argv.join(" ")));
        Ok(ProcessOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }
}

/// Real disk operations plus a call log; tree copies and bundle operations can
/// be denied to prove a code path never touches them.
pub struct StubFileSystem {
    pub log: CallLog,
    pub deny_tree_copy: bool,
}

impl FileSystem for StubFileSystem {
    fn dir_exists(&self, path: &Path) -> bool {
        DiskFileSystem.dir_exists(path)
    }

    fn file_exists(&self, path: &Path) -> bool {
        DiskFileSystem.file_exists(path)
    }

    fn dir_has_contents(&self, path: &Path) -> bool {
        DiskFileSystem.dir_has_contents(path)
    }

    fn copy_directory(&self, from: &Path, to: &Path, force: bool) -> Result<(), MigrateError> {
        self.log
            .push(format!("copy_directory:{}->{}", from.display(), to.display()));
        if self.deny_tree_copy {
            return Err(MigrateError::Config("tree copy denied by test".into()));
        }
        DiskFileSystem.copy_directory(from, to, force)
    }

    fn copy_file(&self, from: &Path, to_dir: &Path) -> Result<PathBuf, MigrateError> {
        self.log
            .push(format!("copy_file:{}->{}", from.display(), to_dir.display()));
        DiskFileSystem.copy_file(from, to_dir)
    }

    fn remove_dir_contents(&self, dir: &Path) -> Result<(), MigrateError> {
        self.log.push(format!("clear_dir:{}", dir.display()));
        DiskFileSystem.remove_dir_contents(dir)
    }

    fn read_text_file(&self, path: &Path) -> Result<String, MigrateError> {
        DiskFileSystem.read_text_file(path)
    }

    fn write_text_file(&self, path: &Path, contents: &str) -> Result<(), MigrateError> {
        DiskFileSystem.write_text_file(path, contents)
    }

    fn copy_directory_to_encrypted_file(
        &self,
        from: &Path,
        bundle_path: &Path,
        secret: &str,
    ) -> Result<(), MigrateError> {
        self.log.push(format!(
            "seal:{}->{}",
            from.display(),
            bundle_path.display()
        ));
        DiskFileSystem.copy_directory_to_encrypted_file(from, bundle_path, secret)
    }

    fn copy_directory_from_encrypted_file(
        &self,
        bundle_path: &Path,
        to: &Path,
        secret: &str,
        force: bool,
    ) -> Result<(), MigrateError> {
        self.log
            .push(format!("unseal:{}->{}", bundle_path.display(), to.display()));
        DiskFileSystem.copy_directory_from_encrypted_file(bundle_path, to, secret, force)
    }
}

/// Fakes the database engine on local disk: capture writes a placeholder
/// archive, restore just validates it.
pub struct StubEngine {
    pub log: CallLog,
}

impl DatabaseEngine for StubEngine {
    fn capture_database(
        &self,
        _cfg: &ServiceConfig,
        dir: &Path,
        name: &str,
    ) -> Result<(), MigrateError> {
        self.log.push(format!("capture_db:{name}"));
        DiskFileSystem.remove_dir_contents(dir)?;
        std::fs::write(archive_path(dir, name), b"stub archive")?;
        Ok(())
    }

    fn restore_database(
        &self,
        _cfg: &ServiceConfig,
        dir: &Path,
        name: &str,
    ) -> Result<(), MigrateError> {
        self.validate_can_restore(dir, name)?;
        self.log.push(format!("restore_db:{name}"));
        Ok(())
    }

    fn validate_can_restore(&self, dir: &Path, name: &str) -> Result<(), MigrateError> {
        let archive = archive_path(dir, name);
        let non_empty = archive
            .metadata()
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);
        if non_empty {
            Ok(())
        } else {
            Err(MigrateError::ArchiveMissing(archive))
        }
    }

    fn rewrite_path_prefix(
        &self,
        _cfg: &ServiceConfig,
        database: &str,
        collection: &str,
        field: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<u64, MigrateError> {
        self.log.push(format!(
            "rewrite:{database}.{collection}.{field}:{old_prefix}->{new_prefix}"
        ));
        Ok(1)
    }

    fn merge_within_instance(
        &self,
        _cfg: &ServiceConfig,
        source_db: &str,
        destination_db: &str,
        dry_run: bool,
    ) -> Result<MergeReport, MigrateError> {
        self.log
            .push(format!("merge:{source_db}->{destination_db}:dry={dry_run}"));
        Ok(MergeReport::default())
    }
}

pub struct StubServices {
    pub log: CallLog,
    pub fail_stop: bool,
    pub fail_start: bool,
}

impl ServiceControl for StubServices {
    fn stop_all(&self) -> Result<(), MigrateError> {
        self.log.push("stop_all");
        if self.fail_stop {
            return Err(MigrateError::ServiceControlFailed("stop refused".into()));
        }
        Ok(())
    }

    fn start_all(&self) -> Result<(), MigrateError> {
        self.log.push("start_all");
        if self.fail_start {
            return Err(MigrateError::ServiceControlFailed("start refused".into()));
        }
        Ok(())
    }
}

pub struct StubOptions {
    pub force: bool,
    pub deny_tree_copy: bool,
    pub fail_start: bool,
}

impl Default for StubOptions {
    fn default() -> Self {
        Self {
            force: false,
            deny_tree_copy: false,
            fail_start: false,
        }
    }
}

/// A fully stubbed facade bundle sharing one call log.
pub fn stub_facades(config_dir: &Path, options: StubOptions) -> (FacadeBundle, CallLog) {
    let log = CallLog::default();
    let bundle = FacadeBundle {
        process: Box::new(StubRunner { log: log.clone() }),
        fs: Box::new(StubFileSystem {
            log: log.clone(),
            deny_tree_copy: options.deny_tree_copy,
        }),
        db: Box::new(StubEngine { log: log.clone() }),
        services: Box::new(StubServices {
            log: log.clone(),
            fail_stop: false,
            fail_start: options.fail_start,
        }),
        config_dir: config_dir.to_path_buf(),
        force: options.force,
    };
    (bundle, log)
}

/// Mark a service as installed by writing its configuration file.
pub fn install_service(config_dir: &Path, display_name: &str) {
    std::fs::create_dir_all(config_dir).unwrap();
    let body = format!(
        r#"{{"{display_name}":{{"Mongo.Host":"localhost","Mongo.Port":27017,"Mongo.Database":"{}"}}}}"#,
        display_name.to_ascii_lowercase()
    );
    std::fs::write(config_dir.join(format!("{display_name}.json")), body).unwrap();
}
