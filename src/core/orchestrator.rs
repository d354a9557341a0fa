use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{bail, Context, Result};

use crate::core::error::MigrateError;
use crate::db::config::ServiceConfig;
use crate::db::merge::MergeReport;
use crate::facades::service::ServiceControl;
use crate::facades::FacadeBundle;
use crate::plugins::{PluginArgs, ServicePlugin};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Capture,
    Restore,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Capture => write!(f, "capture"),
            Action::Restore => write!(f, "restore"),
        }
    }
}

static TRAP_ARMED: AtomicBool = AtomicBool::new(false);
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl-C trap. Outside the protected region the default
/// behavior is preserved; inside it the interrupt is deferred until after
/// the services have been restarted.
pub fn install_interrupt_trap() {
    let result = ctrlc::set_handler(|| {
        if TRAP_ARMED.load(Ordering::SeqCst) {
            INTERRUPTED.store(true, Ordering::SeqCst);
            log::warn!("interrupt received; finishing the current step and restarting services");
        } else {
            std::process::exit(130);
        }
    });
    if let Err(e) = result {
        log::warn!("could not install interrupt handler: {e}");
    }
}

/// Arms on construction, guarantees a start-all on every exit path. The
/// explicit release surfaces start errors; the drop path covers panics and
/// early returns.
struct StartGuard<'a> {
    services: &'a dyn ServiceControl,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    fn new(services: &'a dyn ServiceControl) -> Self {
        TRAP_ARMED.store(true, Ordering::SeqCst);
        Self {
            services,
            armed: true,
        }
    }

    fn release(mut self) -> Result<(), MigrateError> {
        self.armed = false;
        TRAP_ARMED.store(false, Ordering::SeqCst);
        self.services.start_all()
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            TRAP_ARMED.store(false, Ordering::SeqCst);
            if let Err(e) = self.services.start_all() {
                log::error!("failed to restart services: {e}");
            }
        }
    }
}

/// Run the capture or restore sweep over `plugins`, in order.
///
/// Pre-flight runs before anything is stopped; once the service manager has
/// been stopped, start-all runs on every exit path. A plugin failure aborts
/// the remaining plugins but never the restart.
pub fn migrate(
    plugins: &[Box<dyn ServicePlugin>],
    action: Action,
    workspace: &Path,
    facades: &FacadeBundle,
    plugin_args: &HashMap<String, PluginArgs>,
) -> Result<()> {
    if plugins.is_empty() {
        bail!(MigrateError::ArgumentMisuse("no plugins selected".into()));
    }
    let empty = PluginArgs::default();
    let args_for = |p: &dyn ServicePlugin| plugin_args.get(p.id()).unwrap_or(&empty);

    log::info!(
        "{action} of {} plugin(s) against workspace '{}'",
        plugins.len(),
        workspace.display()
    );

    // Pre-flight: collect every failure before touching the services.
    let mut failures = Vec::new();
    for p in plugins.iter() {
        let dir = workspace.join(p.name());
        let check = match action {
            Action::Capture => p.pre_capture_check(&dir, facades, args_for(p.as_ref())),
            Action::Restore => p.pre_restore_check(&dir, facades, args_for(p.as_ref())),
        };
        if let Err(e) = check.with_context(|| format!("pre-flight failed for plugin '{}'", p.id())) {
            failures.push(e);
        }
    }
    if !failures.is_empty() {
        let first = failures.remove(0);
        for extra in &failures {
            log::error!("{extra:#}");
        }
        return Err(first);
    }

    facades.services.stop_all()?;
    let guard = StartGuard::new(facades.services.as_ref());

    let sweep = (|| -> Result<()> {
        for p in plugins.iter() {
            if INTERRUPTED.swap(false, Ordering::SeqCst) {
                return Err(MigrateError::Interrupted.into());
            }
            let dir = workspace.join(p.name());
            log::info!("=== {action}: {} ===", p.name());
            let run = match action {
                Action::Capture => p.capture(&dir, facades, args_for(p.as_ref())),
                Action::Restore => p.restore(&dir, facades, args_for(p.as_ref())),
            };
            run.with_context(|| format!("plugin '{}' {action} failed", p.id()))?;
        }
        Ok(())
    })();

    let started = guard.release();
    sweep?;
    started?;
    log::info!("{action} finished");
    Ok(())
}

/// One-shot intra-instance repair: stop, merge, guaranteed start.
pub fn run_repair(
    facades: &FacadeBundle,
    cfg: &ServiceConfig,
    source_db: &str,
    destination_db: &str,
    dry_run: bool,
) -> Result<MergeReport> {
    facades.services.stop_all()?;
    let guard = StartGuard::new(facades.services.as_ref());
    let merged = facades
        .db
        .merge_within_instance(cfg, source_db, destination_db, dry_run);
    let started = guard.release();
    let report = merged?;
    started?;
    Ok(report)
}
