use std::process::Command;

use crate::core::error::MigrateError;

/// Outcome of a completed external program.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs to completion, capturing their output.
pub trait ProcessRunner {
    /// Run `argv`, treating any non-zero exit as `ProcessFailed`.
    fn run(&self, argv: &[String]) -> Result<ProcessOutput, MigrateError> {
        self.run_with_allowed_codes(argv, &[])
    }

    /// Run `argv`; exit codes in `allowed` pass through as success alongside zero.
    fn run_with_allowed_codes(
        &self,
        argv: &[String],
        allowed: &[i32],
    ) -> Result<ProcessOutput, MigrateError>;
}

/// Production runner backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn run_with_allowed_codes(
        &self,
        argv: &[String],
        allowed: &[i32],
    ) -> Result<ProcessOutput, MigrateError> {
        let program = argv
            .first()
            .ok_or_else(|| MigrateError::Config("empty command line".into()))?;
        log::debug!("running: {}", argv.join(" "));

        let output = Command::new(program)
            .args(&argv[1..])
            .output()
            .map_err(|e| MigrateError::ProcessFailed {
                program: program.clone(),
                code: None,
                stderr: e.to_string(),
            })?;

        let result = ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        match result.code {
            Some(0) => Ok(result),
            Some(c) if allowed.contains(&c) => {
                log::debug!("'{}' exited {} (tolerated)", program, c);
                Ok(result)
            }
            code => Err(MigrateError::ProcessFailed {
                program: program.clone(),
                code,
                stderr: result.stderr,
            }),
        }
    }
}
