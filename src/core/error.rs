use std::path::PathBuf;
use thiserror::Error;

/// Failure kinds surfaced by the migration core.
#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("{0}")]
    ArgumentMisuse(String),

    #[error("service for plugin '{0}' is not installed on this host")]
    ServiceNotInstalled(String),

    #[error("database archive missing or empty: {}", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("source does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("destination is not empty: {} (pass --force to replace it)", .0.display())]
    DestinationNotEmpty(PathBuf),

    #[error("destination database is not ready: {0}")]
    DestinationNotReady(String),

    #[error("'{program}' exited with code {code:?}: {stderr}")]
    ProcessFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("database dump failed for '{database}': {stderr}")]
    DumpFailed { database: String, stderr: String },

    #[error("database restore failed for '{database}': {stderr}")]
    RestoreFailed { database: String, stderr: String },

    #[error("service manager command failed: {0}")]
    ServiceControlFailed(String),

    #[error("encrypted bundle already exists: {}", .0.display())]
    BundleExists(PathBuf),

    #[error("encrypted bundle could not be authenticated (wrong secret or corrupt file): {}", .0.display())]
    BundleAuthFailed(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database client error: {0}")]
    Client(String),

    #[error("operator interrupt")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Process exit code for a failed run. Argument-surface misuse exits 2, the
/// same convention clap applies to its own parse failures; everything else
/// exits 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<MigrateError>() {
        Some(MigrateError::ArgumentMisuse(_)) => 2,
        _ => 1,
    }
}

impl From<mongodb::error::Error> for MigrateError {
    fn from(err: mongodb::error::Error) -> Self {
        MigrateError::Client(err.to_string())
    }
}

impl From<zip::result::ZipError> for MigrateError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(io) => MigrateError::Io(io),
            other => MigrateError::Config(format!("archive error: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_argument_misuse_exits_two_even_when_wrapped() {
        let err = Err::<(), _>(MigrateError::ArgumentMisuse("no plugins selected".into()))
            .context("parsing the command line")
            .unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_other_failures_exit_one() {
        let stop = anyhow::Error::from(MigrateError::ServiceControlFailed("stop refused".into()));
        assert_eq!(exit_code(&stop), 1);

        let plain = anyhow::anyhow!("something else entirely");
        assert_eq!(exit_code(&plain), 1);
    }
}
