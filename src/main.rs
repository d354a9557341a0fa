use anyhow::Result;
use log::LevelFilter;

use gridlink_migrate::core::args::{self, CliRequest, Verb};
use gridlink_migrate::core::{error, orchestrator};
use gridlink_migrate::db::config::ServiceConfig;
use gridlink_migrate::plugins::{self, taghistorian};
use gridlink_migrate::FacadeBundle;

fn main() {
    let registry = plugins::builtin_plugins();
    let matches = args::build_cli(&registry).get_matches();
    let request = args::parse_request(&matches, &registry);

    init_logging(&request);
    orchestrator::install_interrupt_trap();

    if let Err(e) = run(request, registry) {
        if log::max_level() >= LevelFilter::Trace {
            eprintln!("error: {e:?}");
        } else {
            eprintln!("error: {e:#}");
        }
        std::process::exit(error::exit_code(&e));
    }
}

fn run(request: CliRequest, registry: Vec<Box<dyn plugins::ServicePlugin>>) -> Result<()> {
    let facades = FacadeBundle::production(request.force);

    match request.verb {
        Verb::Capture | Verb::Restore => {
            let action = request.verb.action().expect("migration verb");
            let selected = args::select_plugins(&request, registry, &facades)?;
            log::info!(
                "selected plugins: {}",
                selected
                    .iter()
                    .map(|p| p.id())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            orchestrator::migrate(
                &selected,
                action,
                &request.workspace,
                &facades,
                &request.plugin_args,
            )
        }
        Verb::ThdbBug => {
            let cfg = ServiceConfig::load(&facades.config_dir, taghistorian::DISPLAY_NAME)?;
            let destination = cfg.database_name(taghistorian::DISPLAY_NAME).to_string();
            let report = orchestrator::run_repair(
                &facades,
                &cfg,
                taghistorian::MISROUTED_SOURCE_DB,
                &destination,
                request.dry_run,
            )?;
            println!(
                "{}: {} values copied ({} already present), {} metadata inserted, \
                 {} merged, {} links rewritten",
                if request.dry_run { "dry-run" } else { "done" },
                report.values_copied,
                report.values_skipped,
                report.metadata_inserted,
                report.metadata_merged,
                report.links_rewritten,
            );
            Ok(())
        }
    }
}

fn init_logging(request: &CliRequest) {
    let level = if request.debug {
        LevelFilter::Trace
    } else if request.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_env(env_logger::Env::default())
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}
