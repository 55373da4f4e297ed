/// Librato - music inbox daemon
use clap::{Parser, Subcommand};
use librato::{DaemonError, DaemonSupervisor, LibratoConfig, ShutdownSignals};
use librato_artwork::{CoverFetcher, CoverOutcome};
use librato_importer::{FileOrganizer, LibraryOrganizer, LibraryPipeline};
use librato_state::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "librato")]
#[command(about = "Watches a music inbox and files tracks into a tagged library", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "LIBRATO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the inbox and organize files as they arrive
    Daemon,
    /// Organize a directory once and exit
    Organize {
        /// Directory to organize (defaults to the daemon watch directory)
        #[arg(short, long)]
        source: Option<PathBuf>,
        /// Show where files would go without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the processing counters from the state file
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging comes up first so config errors are reported through it
    let config = LibratoConfig::load(cli.config.as_deref());
    let log_level = config.as_ref().map_or("info", |c| c.log_level.as_str());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "librato={0},librato_importer={0},librato_state={0},librato_artwork={0}",
                    log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config?;

    match cli.command {
        Commands::Daemon => {
            run_daemon(config).await?;
        }
        Commands::Organize { source, dry_run } => {
            organize(config, source, dry_run).await?;
        }
        Commands::Status => {
            status(&config).await;
        }
    }

    Ok(())
}

async fn run_daemon(config: LibratoConfig) -> anyhow::Result<()> {
    config.validate_daemon()?;
    let signals = ShutdownSignals::install()?;

    let state = Arc::new(StateStore::load(&config.daemon.state_file).await);
    let organizer = Arc::new(LibraryOrganizer::new(
        config.library()?,
        config.path_template(),
    ));

    let mut pipeline = LibraryPipeline::new(organizer, state.clone(), config.organize_options()?);
    if config.artwork.enabled {
        pipeline = pipeline.with_cover_fetcher(CoverFetcher::new(config.artwork_config())?);
    } else {
        tracing::info!("Cover fetching disabled");
    }

    let mut supervisor =
        DaemonSupervisor::new(config.daemon_options()?, state, Arc::new(pipeline), signals);

    tracing::info!("Library: {}", config.library()?.display());
    tracing::info!("Quarantine: {}", config.quarantine_dir()?.display());
    tracing::info!("State file: {}", config.daemon.state_file.display());

    supervisor.start().await?;
    supervisor.run().await?;

    Ok(())
}

async fn organize(
    config: LibratoConfig,
    source: Option<PathBuf>,
    dry_run: bool,
) -> anyhow::Result<()> {
    config.validate()?;

    let source = match source {
        Some(source) => source,
        None => config.watch_dir()?.to_path_buf(),
    };
    if !source.is_dir() {
        return Err(DaemonError::Config(format!(
            "source {} is not a directory",
            source.display()
        ))
        .into());
    }

    let organizer = LibraryOrganizer::new(config.library()?, config.path_template())
        .with_dry_run(dry_run);

    tracing::info!(
        "Organizing {} into {}{}",
        source.display(),
        organizer.library_root().display(),
        if dry_run { " (dry run)" } else { "" }
    );

    let summary = tokio::task::spawn_blocking(move || organizer.process_directory(&source))
        .await??;

    println!("Moved:            {}", summary.moved);
    println!("Already in place: {}", summary.already_in_place);
    if dry_run {
        println!("Would move:       {}", summary.planned);
    }
    println!("Companion files:  {}", summary.companions_moved);
    println!("Untagged:         {}", summary.untagged);
    println!("Failed:           {}", summary.failed);

    if dry_run || !config.artwork.enabled {
        return Ok(());
    }

    // One album at a time: MusicBrainz rate-limits per client
    let covers = CoverFetcher::new(config.artwork_config())?;
    for (album_dir, album) in &summary.albums {
        match covers
            .fetch_cover(album_dir, &album.artist, &album.album)
            .await
        {
            Ok(CoverOutcome::Saved(path)) => println!("Saved cover {}", path.display()),
            Ok(outcome) => tracing::debug!("{}: {:?}", album_dir.display(), outcome),
            Err(e) => tracing::warn!("Cover fetch failed for {}: {}", album_dir.display(), e),
        }
    }

    Ok(())
}

async fn status(config: &LibratoConfig) {
    let state_file = &config.daemon.state_file;
    let state = StateStore::load(state_file).await;
    let stats = state.stats().await;

    println!("State file:      {}", state_file.display());
    println!("Tracking since:  {}", stats.started_at.to_rfc3339());
    println!("Records:         {}", state.record_count().await);
    println!("Processed:       {}", stats.total_processed);
    println!("Succeeded:       {}", stats.total_success);
    println!("Failed:          {}", stats.total_failed);
}
