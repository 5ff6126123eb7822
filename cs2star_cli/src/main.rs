//! # cs2star_cli
//!
//! Part of the cs2star crate family.
//!
//! This is the command line application exporting `.cs` particle datasets to STAR and
//! MRCS files.
//!
//! ## Install
//!
//! Use `cargo install --path ./cs2star_cli`
//!
//! ## Use
//!
//! Make a template configuration, edit it, then run the export
//!
//! ```bash
//! cs2star_cli -p config.yml new
//! cs2star_cli -p config.yml
//! ```
//!
//! `--dry-run` only aggregates the particles and reports how many micrographs hold very
//! few of them. `cs2star_cli inspect particles.star` summarizes an existing STAR file.
//!
//! Progress is shown per worker. A run log is written to `./cs2star.log`; particles
//! which could not be exported are listed in the error log next to the STAR file.
use clap::{Arg, ArgAction, ArgMatches, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc::channel;
use std::sync::Arc;

use libcs2star::config::Config;
use libcs2star::inspect::StarSummary;
use libcs2star::process::{new_cancel_token, run_export, ExportReport};
use libcs2star::worker_status::{BarColor, WorkerStatus};

fn make_cli() -> Command {
    Command::new("cs2star_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .subcommand(
            Command::new("inspect")
                .about("Summarize the particles of a STAR file")
                .arg(Arg::new("star").required(true).help("Path to the STAR file")),
        )
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Only aggregate particles and report group sizes"),
        )
}

fn setup_logging() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./cs2star.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let term_sink = Arc::new(
        spdlog::sink::StdStreamSink::builder()
            .std_stream(spdlog::sink::StdStream::Stderr)
            .level_filter(spdlog::LevelFilter::MoreSevereEqual(spdlog::Level::Info))
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .sink(term_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn bar_style(color: &BarColor) -> ProgressStyle {
    let template = match color {
        BarColor::CYAN => "{prefix} [{bar:40.cyan/blue}] {percent}%",
        BarColor::MAGENTA => "{prefix} [{bar:40.magenta/blue}] {percent}%",
        BarColor::RED => "{prefix} [{bar:40.red/blue}] {percent}%",
        BarColor::GREEN => "{prefix} [{bar:40.green/blue}] {percent}%",
    };
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

fn inspect(star_path: &Path) {
    match StarSummary::from_path(star_path) {
        Ok(summary) => {
            spdlog::info!("Particle table: {}", summary.table);
            spdlog::info!("Particles: {}", summary.n_particles);
            spdlog::info!("Micrographs: {}", summary.micrographs.len());
            for (name, count) in summary.micrographs.iter() {
                spdlog::info!("  {name}: {count}");
            }
            spdlog::info!(
                "Micrographs with one particle: {}, under five: {}, under ten: {}",
                summary.buckets.exactly_one,
                summary.buckets.under_five,
                summary.buckets.under_ten
            );
        }
        Err(e) => spdlog::error!("Could not inspect {}: {e}", star_path.display()),
    }
}

fn load_config(matches: &ArgMatches, config_path: &Path) -> Option<Config> {
    spdlog::info!("Loading config from {}...", config_path.display());
    let mut config = match Config::read_config_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            spdlog::error!("{e}");
            return None;
        }
    };
    if matches.get_flag("dry-run") {
        config.dry_run = true;
    }
    spdlog::info!("Config successfully loaded.");
    spdlog::info!("CS Path: {}", config.cs_path.display());
    for path in config.passthrough_paths.iter() {
        spdlog::info!("Passthrough Path: {}", path.display());
    }
    spdlog::info!("Project Path: {}", config.project_path.display());
    spdlog::info!("Output Path: {}", config.output_path.display());
    spdlog::info!("Workers: {}", config.n_threads);
    spdlog::info!("Dry Run: {}", config.dry_run);
    Some(config)
}

fn main() {
    let matches = make_cli().get_matches();

    if let Err(e) = setup_logging() {
        eprintln!("Could not create logging: {e}");
        return;
    }

    if let Some(("inspect", sub_matches)) = matches.subcommand() {
        if let Some(star) = sub_matches.get_one::<String>("star") {
            inspect(Path::new(star));
        }
        return;
    }

    let config_path = match matches.get_one::<String>("path") {
        Some(path) => PathBuf::from(path),
        None => {
            spdlog::error!("A configuration path is required (-p/--path)");
            return;
        }
    };

    if let Some(("new", _)) = matches.subcommand() {
        spdlog::info!("Making a template config at {}...", config_path.display());
        match Config::default().write_config_file(&config_path) {
            Ok(()) => spdlog::info!("Done."),
            Err(e) => spdlog::error!("{e}"),
        }
        return;
    }

    let Some(config) = load_config(&matches, &config_path) else {
        return;
    };

    let cancel = new_cancel_token();
    let handler_cancel = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        handler_cancel.store(true, Ordering::Relaxed);
    }) {
        spdlog::warn!("Could not install the Ctrl-C handler: {e}");
    }

    let (tx, rx) = channel::<WorkerStatus>();
    let handle = std::thread::spawn(move || run_export(config, tx, cancel));

    // Bars are created as workers report in
    let pb_manager = MultiProgress::new();
    let mut bars: Vec<ProgressBar> = vec![];
    for status in rx {
        while bars.len() <= status.worker_id {
            let bar = pb_manager.add(ProgressBar::new(100));
            bar.set_style(bar_style(&BarColor::CYAN));
            bar.set_prefix(format!("Worker {}", bars.len()));
            bars.push(bar);
        }
        let bar = &bars[status.worker_id];
        bar.set_style(bar_style(&status.color));
        bar.set_position((status.progress * 100.0) as u64);
    }
    for bar in bars.iter() {
        bar.finish();
    }

    match handle.join() {
        Ok(Ok(ExportReport::DryRun(report))) => {
            spdlog::info!(
                "Dry run found {} particles in {} micrographs",
                report.total_particles,
                report.total_groups
            );
            spdlog::info!(
                "Micrographs with one particle: {}, under five: {}, under ten: {}",
                report.buckets.exactly_one,
                report.buckets.under_five,
                report.buckets.under_ten
            );
        }
        Ok(Ok(ExportReport::Export(summary))) => {
            spdlog::info!(
                "Exported {} particles in {} stacks",
                summary.total_particles,
                summary.total_groups - summary.groups_skipped
            );
            if summary.groups_skipped > 0 || summary.groups_with_particle_errors > 0 {
                spdlog::warn!(
                    "{} stacks skipped, {} stacks with particle errors, {} error log entries",
                    summary.groups_skipped,
                    summary.groups_with_particle_errors,
                    summary.error_log_entries
                );
            }
        }
        Ok(Err(e)) => spdlog::error!("Export failed with error: {e}"),
        Err(_) => spdlog::error!("Failed to join export task!"),
    }

    spdlog::info!("Done.");
}
