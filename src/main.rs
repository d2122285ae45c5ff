use anyhow::Result;
use clap::Parser;
use cribwatch::{
    Backends, CribwatchConfig, EventFilter, EventReceiver, TestPatternSource, WatchPipeline,
};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cribwatch")]
#[command(about = "Live nursery monitor with fan-out detection stages and a fused video output")]
#[command(version)]
#[command(long_about = "Fans a live camera feed out to rate-limited object, fall and toddler \
detection stages, watches the audio track for crying, and fuses every stage's latest results \
into one annotated video stream and still image.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "cribwatch.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the pipeline")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Run the pipeline on a synthetic source with idle backends
    #[arg(
        long,
        value_name = "SECONDS",
        help = "Run on a synthetic test pattern with idle models for SECONDS, then exit"
    )]
    dry_run: Option<u64>,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    info!("Starting cribwatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match CribwatchConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    run_synthetic(config, args.dry_run.map(Duration::from_secs)).await
}

/// Run the full pipeline on a test pattern with idle models
///
/// Stops after `duration`, or on Ctrl-C when no duration is given.
async fn run_synthetic(config: CribwatchConfig, duration: Option<Duration>) -> Result<()> {
    warn!("No inference models linked, running with idle backends");

    let pipeline = WatchPipeline::new(&config, Backends::idle()).map_err(|e| {
        error!("Failed to build pipeline: {}", e);
        e
    })?;

    let mut events = EventReceiver::new(
        pipeline.event_bus().subscribe(),
        EventFilter::All,
        "cli".to_string(),
    );
    let event_logger = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            info!("Event: {}", event.description());
        }
    });

    // stand-in for the outbound track's reader
    let sink = std::sync::Arc::clone(pipeline.sink());
    let track_reader = tokio::spawn(async move {
        let mut frames = 0u64;
        while sink.recv().await.is_some() {
            frames += 1;
        }
        frames
    });

    let (width, height) = config.source.resolution;
    let source = TestPatternSource::new(width, height, config.source.fps);
    pipeline.start(Box::new(source)).await?;

    match duration {
        Some(duration) => {
            info!("Dry run for {:?}", duration);
            tokio::time::sleep(duration).await;
        }
        None => {
            info!("Running until Ctrl-C");
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl-C");
        }
    }

    let status = pipeline.status();
    let video = status.video_status();
    let cry = status.cry_status();
    info!(
        "Video: publisher_initialized={} has_frame={}",
        video.publisher_initialized, video.has_frame
    );
    info!(
        "Audio: enabled={} reason={}",
        cry.state.enabled,
        cry.state.disable_reason.as_deref().unwrap_or("-")
    );

    pipeline.stop().await;
    let frames_read = track_reader.await?;
    event_logger.abort();

    let stats = pipeline.stats();
    info!(
        "Distributor: received={} throttled={} dropped={} dispatched={}",
        stats.distributor.frames_received,
        stats.distributor.frames_throttled,
        stats.distributor.frames_dropped,
        stats.distributor.frames_dispatched
    );
    for stage in &stats.stages {
        info!(
            "Stage {}: admitted={} dropped={} inferences={} failures={}",
            stage.name,
            stage.frames_admitted,
            stage.frames_dropped,
            stage.inferences,
            stage.failures
        );
    }
    info!(
        "Fusion: published={} dropped={} failures={} (track reader got {})",
        stats.fusion.frames_published,
        stats.fusion.frames_dropped,
        stats.fusion.failures,
        frames_read
    );

    info!("cribwatch exited cleanly");
    Ok(())
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cribwatch={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .init();

    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Cribwatch configuration file");
    println!("# Default values for every option");
    println!("# Environment overrides use CRIBWATCH__<SECTION>__<KEY>");
    println!();
    println!("{}", toml::to_string(&CribwatchConfig::default())?);
    Ok(())
}
