use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use std::path::PathBuf;
use transcoder::{
    config::TranscodeConfig,
    guard::guard_from_config,
    reconcile::store_from_config,
    Encoder, FileQueue, PathTranslator, Pipeline, Reconciler, RunOutcome,
};

/// Queue a finished recording for conversion and process the queue
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Recording to convert
    input: Option<PathBuf>,

    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "transcoder.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG overrides the default level
    env_logger::Builder::new()
        .filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let cfg = TranscodeConfig::load_config(Some(&args.config))
        .context("Failed to load configuration")?;

    if let Err(e) = cfg.validate() {
        error!("Please check your configuration file ({}): {}", args.config.display(), e);
        return Ok(());
    }

    let Some(input) = args.input else {
        return Ok(());
    };
    if !input.exists() {
        info!("Input does not exist, nothing to do: {}", input.display());
        return Ok(());
    }

    let pipeline = Pipeline::new(
        FileQueue::new(&cfg.queue_file),
        guard_from_config(&cfg),
        Encoder::from_config(&cfg)?,
        PathTranslator::new(cfg.path_prefix.as_str(), cfg.path_replacement.as_str()),
        Reconciler::new(store_from_config(&cfg)?),
    );

    match pipeline.run(&input).await? {
        RunOutcome::Deferred => info!("Deferred {} to the running instance", input.display()),
        RunOutcome::Drained(summary) => {
            info!("Done: {} file(s) converted, {} failed", summary.converted, summary.failed)
        }
    }

    Ok(())
}
