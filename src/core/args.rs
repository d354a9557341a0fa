use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::core::error::MigrateError;
use crate::core::orchestrator::Action;
use crate::facades::FacadeBundle;
use crate::plugins::{PluginArgs, ServicePlugin};

const ABOUT: &str = "Capture the state of a GridLink host and restore it onto another";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Capture,
    Restore,
    ThdbBug,
}

impl Verb {
    pub fn action(self) -> Option<Action> {
        match self {
            Verb::Capture => Some(Action::Capture),
            Verb::Restore => Some(Action::Restore),
            Verb::ThdbBug => None,
        }
    }
}

/// Everything the entry point needs from a parsed command line.
#[derive(Debug)]
pub struct CliRequest {
    pub verb: Verb,
    pub debug: bool,
    pub verbose: bool,
    pub workspace: PathBuf,
    pub all: bool,
    pub force: bool,
    /// Explicitly selected plugin ids, in registry order.
    pub explicit: Vec<String>,
    /// Per-plugin extra-switch bags, keyed by plugin id.
    pub plugin_args: HashMap<String, PluginArgs>,
    pub dry_run: bool,
}

/// Build the full parser from the plugin registry. Every plugin contributes
/// its selection switch and its extra switches to both migration verbs.
pub fn build_cli(plugins: &[Box<dyn ServicePlugin>]) -> Command {
    Command::new("gridlink-migrate")
        .about(ABOUT)
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Trace-level logging and full error chains"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Debug-level logging"),
        )
        .subcommand(migration_subcommand(
            "capture",
            "Capture service state into a workspace directory",
            false,
            plugins,
        ))
        .subcommand(migration_subcommand(
            "restore",
            "Restore service state from a workspace directory",
            true,
            plugins,
        ))
        .subcommand(
            Command::new("thdbbug")
                .about("Repair tag history that was written to the wrong database")
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Report what would move without writing"),
                ),
        )
}

fn migration_subcommand(
    name: &'static str,
    about: &'static str,
    is_restore: bool,
    plugins: &[Box<dyn ServicePlugin>],
) -> Command {
    let mut sub = Command::new(name)
        .about(about)
        .arg(
            Arg::new("dir")
                .long("dir")
                .value_name("PATH")
                .help("Workspace directory (default: <documents>/migration)"),
        )
        .arg(
            Arg::new("all")
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Select every service installed on this host"),
        );
    if is_restore {
        sub = sub.arg(
            Arg::new("force")
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Replace existing databases and data trees"),
        );
    }
    for p in plugins {
        sub = sub.arg(
            Arg::new(p.id())
                .long(p.id())
                .action(ArgAction::SetTrue)
                .help(p.help()),
        );
        for extra in p.extra_args() {
            let switch = format!("{}-{}", p.id(), extra.name);
            let mut arg = Arg::new(switch.clone()).long(switch).help(extra.help);
            arg = if extra.takes_value {
                arg.value_name(extra.name.to_ascii_uppercase().replace('-', "_"))
            } else {
                arg.action(ArgAction::SetTrue)
            };
            sub = sub.arg(arg);
        }
    }
    sub
}

pub fn parse_request(matches: &ArgMatches, plugins: &[Box<dyn ServicePlugin>]) -> CliRequest {
    let debug = matches.get_flag("debug");
    let verbose = matches.get_flag("verbose");

    let (name, sub) = matches
        .subcommand()
        .expect("subcommand_required is set on the parser");
    let verb = match name {
        "capture" => Verb::Capture,
        "restore" => Verb::Restore,
        "thdbbug" => Verb::ThdbBug,
        other => unreachable!("unknown subcommand '{other}'"),
    };

    if verb == Verb::ThdbBug {
        return CliRequest {
            verb,
            debug,
            verbose,
            workspace: PathBuf::new(),
            all: false,
            force: false,
            explicit: Vec::new(),
            plugin_args: HashMap::new(),
            dry_run: sub.get_flag("dry-run"),
        };
    }

    let workspace = sub
        .get_one::<String>("dir")
        .map(PathBuf::from)
        .unwrap_or_else(default_workspace);
    let force = verb == Verb::Restore && sub.get_flag("force");

    let mut explicit = Vec::new();
    let mut plugin_args = HashMap::new();
    for p in plugins {
        if sub.get_flag(p.id()) {
            explicit.push(p.id().to_string());
        }
        let mut bag = PluginArgs::default();
        for extra in p.extra_args() {
            let switch = format!("{}-{}", p.id(), extra.name);
            if extra.takes_value {
                if let Some(v) = sub.get_one::<String>(&switch) {
                    bag.set_value(extra.name, v.clone());
                }
            } else if sub.get_flag(&switch) {
                bag.set_flag(extra.name);
            }
        }
        if !bag.is_empty() {
            plugin_args.insert(p.id().to_string(), bag);
        }
    }

    CliRequest {
        verb,
        debug,
        verbose,
        workspace,
        all: sub.get_flag("all"),
        force,
        explicit,
        plugin_args,
        dry_run: false,
    }
}

/// Resolve the operator's selection against the registry and the host.
///
/// Explicit switches win over `--all`; an explicitly named plugin whose
/// service is absent is an error, while `--all` silently filters to what is
/// installed.
pub fn select_plugins(
    request: &CliRequest,
    registry: Vec<Box<dyn ServicePlugin>>,
    facades: &FacadeBundle,
) -> Result<Vec<Box<dyn ServicePlugin>>, MigrateError> {
    if !request.explicit.is_empty() {
        let mut selected = Vec::new();
        for plugin in registry {
            if !request.explicit.iter().any(|id| id == plugin.id()) {
                continue;
            }
            if !plugin.is_installed(facades) {
                return Err(MigrateError::ServiceNotInstalled(plugin.id().to_string()));
            }
            selected.push(plugin);
        }
        return Ok(selected);
    }

    if request.all {
        let selected: Vec<_> = registry
            .into_iter()
            .filter(|p| {
                let installed = p.is_installed(facades);
                if !installed {
                    log::debug!("skipping '{}': service not installed", p.id());
                }
                installed
            })
            .collect();
        if selected.is_empty() {
            return Err(MigrateError::ArgumentMisuse(
                "--all selected no plugins: no GridLink services are installed on this host".into(),
            ));
        }
        return Ok(selected);
    }

    Err(MigrateError::ArgumentMisuse(
        "no plugins selected; pass --all or one or more plugin switches".into(),
    ))
}

fn default_workspace() -> PathBuf {
    dirs::document_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("migration")
}
