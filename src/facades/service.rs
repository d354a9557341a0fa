use crate::core::error::MigrateError;
use crate::facades::process::{ProcessRunner, SystemProcessRunner};

/// Exit code the service manager returns when services are already stopped.
const ALREADY_STOPPED: i32 = 5;

const DEFAULT_SERVER_BIN: &str = "gridlink-server";
const SERVER_BIN_ENV: &str = "GRIDLINK_SERVER_BIN";

/// Stops and starts the whole hosted service suite.
pub trait ServiceControl {
    fn stop_all(&self) -> Result<(), MigrateError>;
    fn start_all(&self) -> Result<(), MigrateError>;
}

/// Shells to the GridLink server controller.
pub struct ServiceManagerClient<R: ProcessRunner = SystemProcessRunner> {
    runner: R,
    program: String,
}

impl ServiceManagerClient<SystemProcessRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemProcessRunner)
    }
}

impl Default for ServiceManagerClient<SystemProcessRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ProcessRunner> ServiceManagerClient<R> {
    pub fn with_runner(runner: R) -> Self {
        let program =
            std::env::var(SERVER_BIN_ENV).unwrap_or_else(|_| DEFAULT_SERVER_BIN.to_string());
        Self { runner, program }
    }

    fn control(&self, verb: &str, allowed: &[i32]) -> Result<(), MigrateError> {
        let argv = vec![self.program.clone(), verb.to_string()];
        self.runner
            .run_with_allowed_codes(&argv, allowed)
            .map_err(|e| match e {
                MigrateError::ProcessFailed { stderr, code, .. } => {
                    MigrateError::ServiceControlFailed(format!(
                        "'{} {}' exited {:?}: {}",
                        self.program,
                        verb,
                        code,
                        stderr.trim()
                    ))
                }
                other => other,
            })?;
        Ok(())
    }
}

impl<R: ProcessRunner> ServiceControl for ServiceManagerClient<R> {
    fn stop_all(&self) -> Result<(), MigrateError> {
        log::info!("stopping all services");
        self.control("stop-all-services", &[ALREADY_STOPPED])
    }

    fn start_all(&self) -> Result<(), MigrateError> {
        log::info!("starting all services");
        self.control("start-all-services", &[])
    }
}
