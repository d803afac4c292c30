use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use scanview::service::CacheConfig;
use scanview::{cli, debug};

#[derive(Parser, Debug)]
#[command(name = "scanview", about = "scanview — thumbnail cache for scan directories")]
struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Annotation document consulted for per-file lookups
    #[arg(long, global = true)]
    annotations: Option<PathBuf>,

    /// Write-back debounce window in milliseconds
    #[arg(long, global = true, default_value_t = 100)]
    debounce_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prime the thumbnail cache for a directory and exit
    Prime { path: PathBuf },
    /// Prime, then keep watching the directory for changes
    #[command(short_flag = 'w')]
    Watch { path: PathBuf },
    /// Show what the viewer would receive for one file
    Show { path: PathBuf, file: String },
}

fn main() {
    let args = Cli::parse();

    debug::init_from_env();
    if args.debug {
        debug::enable();
    }

    let config = CacheConfig {
        debounce: Duration::from_millis(args.debounce_ms),
        annotation_doc: args.annotations.clone(),
        ..CacheConfig::default()
    };

    match args.command {
        Commands::Prime { path } => cli::prime(config, &path),
        Commands::Watch { path } => cli::watch(config, &path),
        Commands::Show { path, file } => cli::show(config, &path, &file),
    }
}
