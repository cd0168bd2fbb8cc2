//! mediasift - media backup deduplication
//!
//! Finds byte-identical files across one or more source trees and copies
//! one survivor per distinct content into a target tree, organized by
//! capture date. Source trees are only ever read.

pub mod actions;
pub mod cache;
pub mod classify;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod output;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use cli::{Cli, Commands};
use config::Settings;
use error::ExitCode;
use pipeline::{DiffOptions, Pipeline, PipelineError, RunOptions};
use progress::Progress;

/// Run the command described by `cli` and return the exit code.
///
/// # Errors
///
/// Returns an error for fatal conditions; [`ExitCode::for_error`] maps it
/// to the process exit code.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet, cli.level_filter());

    let handler = signal::install_handler().context("Failed to set up Ctrl+C handling")?;
    let settings =
        Settings::load(cli.config.as_deref(), &cli.overrides()).map_err(PipelineError::from)?;

    let mut pipeline = Pipeline::new(handler.get_flag());
    if !cli.quiet {
        pipeline = pipeline.with_progress(Arc::new(Progress::new(false)));
    }

    let cache_mode = cli.cache_mode();
    let exit_code = match cli.command {
        Some(Commands::Diff(args)) => {
            let options = DiffOptions {
                folder_a: args.folder_a,
                folder_b: args.folder_b,
                output_json: args.output_json,
                settings,
                cache_mode,
            };
            pipeline.diff(&options)?.exit_code
        }
        None => {
            let mut roots = cli.paths;
            let target = roots.pop().unwrap_or_default();
            let output_json: PathBuf = cli
                .output_json
                .context("--output-json is required")?;
            let options = RunOptions {
                roots,
                target,
                output_json,
                dry_run: !cli.no_dryrun,
                settings,
                cache_mode,
            };
            pipeline.run(&options)?.exit_code
        }
    };

    if handler.is_shutdown_requested() {
        return Ok(ExitCode::Interrupted);
    }
    Ok(exit_code)
}
