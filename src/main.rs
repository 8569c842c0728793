use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::EnvFilter;

use traceglobe::app::App;
use traceglobe::config::{GeoBackend, Settings};
use traceglobe::error::{Error, Result};
use traceglobe::geo::cache::LruCache;
use traceglobe::geo::{lookup, GeoResolver};
use traceglobe::globe::geometry::BoundarySet;
use traceglobe::probe::PathProbe;
use traceglobe::trace::{TraceEvent, TraceOrchestrator};

#[derive(Parser)]
#[command(name = "traceglobe")]
#[command(version)]
#[command(about = "traceglobe: watch a traceroute travel across a rotating terminal globe", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/traceglobe/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Boundary polyline file to draw on the globe
    #[arg(short, long, global = true)]
    boundaries: Option<PathBuf>,

    /// Geolocate offline from a GeoLite2-City database instead of ip-api.com
    #[arg(long, global = true)]
    geoip_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive globe; type a host and press Enter to trace it
    Globe {
        /// Trace this host right away
        target: Option<String>,
    },

    /// Trace one host and print hop coordinates to stdout
    Trace {
        /// Domain name or IP address
        target: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.geoip_db {
        settings.geo.backend = GeoBackend::MaxMind;
        settings.geo.maxmind_db = Some(db);
    }
    if cli.boundaries.is_some() {
        settings.globe.boundaries = cli.boundaries;
    }

    match cli.command {
        Commands::Globe { target } => {
            init_file_logging();
            let orchestrator = Arc::new(build_orchestrator(&settings)?);
            let boundaries = BoundarySet::load_or_empty(settings.globe.boundaries.as_deref());
            info!(boundaries = boundaries.len(), "starting globe");
            App::new(orchestrator, boundaries, &settings.globe).run(target)?;
        }
        Commands::Trace { target } => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
            let orchestrator = Arc::new(build_orchestrator(&settings)?);
            let handle = orchestrator.spawn(target)?;
            let result = handle.wait(|event| match event {
                TraceEvent::Line(line) => println!("{line}"),
                TraceEvent::Stage(stage) => println!("{stage}"),
                TraceEvent::Finished(_) => {}
            });
            match result {
                Ok(coords) => {
                    for coord in coords {
                        println!("{coord}");
                    }
                }
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

fn build_orchestrator(settings: &Settings) -> Result<TraceOrchestrator> {
    let lookup = lookup::from_settings(&settings.geo).map_err(|e| Error::Config(e.to_string()))?;
    let cache = Arc::new(LruCache::new(settings.geo.cache_capacity));
    Ok(TraceOrchestrator::new(
        PathProbe::new(&settings.probe),
        GeoResolver::new(lookup, cache),
    ))
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into())
}

/// The globe owns the terminal, so logs go to a file under the cache dir.
/// Without a writable cache dir logging stays off.
fn init_file_logging() {
    let Some(dir) = dirs::cache_dir().map(|d| d.join("traceglobe")) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = File::options().create(true).append(true).open(dir.join("traceglobe.log")) else {
        return;
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
}
