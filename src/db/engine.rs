use std::path::{Path, PathBuf};

use mongodb::bson::{doc, Bson, Document};
use mongodb::sync::Client;

use crate::core::error::MigrateError;
use crate::db::config::ServiceConfig;
use crate::db::merge::{merge_collections, MergeReport, MongoCollection};
use crate::facades::fs::FileSystem;
use crate::facades::process::ProcessRunner;

/// Conventional archive location: `<dir>/<name>.gz`.
pub fn archive_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.gz"))
}

/// Moves logical databases between an instance and workspace archives.
pub trait DatabaseEngine {
    /// Dump the service's database into `<dir>/<name>.gz`, replacing any
    /// previous contents of `dir`.
    fn capture_database(
        &self,
        cfg: &ServiceConfig,
        dir: &Path,
        name: &str,
    ) -> Result<(), MigrateError>;

    /// Restore the service's database from `<dir>/<name>.gz`.
    fn restore_database(
        &self,
        cfg: &ServiceConfig,
        dir: &Path,
        name: &str,
    ) -> Result<(), MigrateError>;

    /// Pre-flight: the archive must exist and be non-empty.
    fn validate_can_restore(&self, dir: &Path, name: &str) -> Result<(), MigrateError>;

    /// Rewrite `field` in every document of `database.collection` whose value
    /// starts with `old_prefix`. Returns the number of rewritten documents.
    fn rewrite_path_prefix(
        &self,
        cfg: &ServiceConfig,
        database: &str,
        collection: &str,
        field: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<u64, MigrateError>;

    /// Intra-instance merge of `source_db` into `destination_db`.
    fn merge_within_instance(
        &self,
        cfg: &ServiceConfig,
        source_db: &str,
        destination_db: &str,
        dry_run: bool,
    ) -> Result<MergeReport, MigrateError>;
}

const DUMP_TOOL: &str = "mongodump";
const RESTORE_TOOL: &str = "mongorestore";

/// Production engine driving the external Mongo toolchain plus the native
/// client for record-level work.
pub struct MongoToolsEngine {
    runner: Box<dyn ProcessRunner>,
    fs: Box<dyn FileSystem>,
    /// When set, restores pass `--drop` to replace existing collections.
    destructive: bool,
}

impl MongoToolsEngine {
    pub fn new(
        runner: Box<dyn ProcessRunner>,
        fs: Box<dyn FileSystem>,
        destructive: bool,
    ) -> Self {
        Self {
            runner,
            fs,
            destructive,
        }
    }

    fn resolve_tool(name: &str) -> Result<String, MigrateError> {
        which::which(name)
            .map(|p| p.to_string_lossy().into_owned())
            .map_err(|_| MigrateError::Config(format!("'{name}' not found on PATH")))
    }

    fn client(cfg: &ServiceConfig) -> Result<Client, MigrateError> {
        Ok(Client::with_uri_str(cfg.connection_uri()?)?)
    }
}

pub(crate) fn dump_argv(
    tool: &str,
    cfg: &ServiceConfig,
    database: &str,
    archive: &Path,
) -> Result<Vec<String>, MigrateError> {
    let mut argv = vec![tool.to_string()];
    argv.extend(cfg.tool_args()?);
    argv.push(format!("--db={database}"));
    argv.push(format!("--archive={}", archive.display()));
    argv.push("--gzip".to_string());
    Ok(argv)
}

pub(crate) fn restore_argv(
    tool: &str,
    cfg: &ServiceConfig,
    database: &str,
    archive: &Path,
    drop: bool,
) -> Result<Vec<String>, MigrateError> {
    let mut argv = dump_argv(tool, cfg, database, archive)?;
    if drop {
        argv.push("--drop".to_string());
    }
    Ok(argv)
}

impl DatabaseEngine for MongoToolsEngine {
    fn capture_database(
        &self,
        cfg: &ServiceConfig,
        dir: &Path,
        name: &str,
    ) -> Result<(), MigrateError> {
        self.fs.remove_dir_contents(dir)?;
        let database = cfg.database_name(name).to_string();
        let tool = Self::resolve_tool(DUMP_TOOL)?;
        let argv = dump_argv(&tool, cfg, &database, &archive_path(dir, name))?;
        log::info!("dumping database '{database}'");
        self.runner.run(&argv).map_err(|e| match e {
            MigrateError::ProcessFailed { stderr, .. } => MigrateError::DumpFailed {
                database: database.clone(),
                stderr,
            },
            other => other,
        })?;
        Ok(())
    }

    fn restore_database(
        &self,
        cfg: &ServiceConfig,
        dir: &Path,
        name: &str,
    ) -> Result<(), MigrateError> {
        self.validate_can_restore(dir, name)?;
        let database = cfg.database_name(name).to_string();
        let tool = Self::resolve_tool(RESTORE_TOOL)?;
        let argv = restore_argv(
            &tool,
            cfg,
            &database,
            &archive_path(dir, name),
            self.destructive,
        )?;
        log::info!("restoring database '{database}'");
        self.runner.run(&argv).map_err(|e| match e {
            MigrateError::ProcessFailed { stderr, .. } => MigrateError::RestoreFailed {
                database: database.clone(),
                stderr,
            },
            other => other,
        })?;
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
        cfg: &ServiceConfig,
        database: &str,
        collection: &str,
        field: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> Result<u64, MigrateError> {
        let coll = Self::client(cfg)?
            .database(database)
            .collection::<Document>(collection);

        let mut rewritten = 0u64;
        let cursor = coll.find(doc! { field: { "$exists": true } }).run()?;
        for result in cursor {
            let document = result?;
            let Ok(current) = document.get_str(field) else {
                continue;
            };
            let Some(rest) = current.strip_prefix(old_prefix) else {
                continue;
            };
            let id = document
                .get("_id")
                .cloned()
                .unwrap_or(Bson::Null);
            let updated = format!("{new_prefix}{rest}");
            coll.update_one(doc! { "_id": id }, doc! { "$set": { field: updated } })
                .run()?;
            rewritten += 1;
        }
        log::info!(
            "rewrote {rewritten} '{field}' values in {database}.{collection} \
             from '{old_prefix}' to '{new_prefix}'"
        );
        Ok(rewritten)
    }

    fn merge_within_instance(
        &self,
        cfg: &ServiceConfig,
        source_db: &str,
        destination_db: &str,
        dry_run: bool,
    ) -> Result<MergeReport, MigrateError> {
        let client = Self::client(cfg)?;
        let source = client.database(source_db);
        let destination = client.database(destination_db);

        let report = merge_collections(
            &MongoCollection::new(source.collection("metadata")),
            &MongoCollection::new(source.collection("values")),
            &MongoCollection::new(destination.collection("metadata")),
            &MongoCollection::new(destination.collection("values")),
            destination_db,
            dry_run,
        )?;
        log::info!(
            "{}merge '{source_db}' -> '{destination_db}': \
             {} values copied ({} skipped), {} metadata inserted, \
             {} merged, {} links rewritten",
            if dry_run { "[dry-run] " } else { "" },
            report.values_copied,
            report.values_skipped,
            report.metadata_inserted,
            report.metadata_merged,
            report.links_rewritten,
        );
        Ok(report)
    }
}
