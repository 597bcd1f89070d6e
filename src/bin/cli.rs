//! EmberKV CLI
//!
//! Command-line interface operating directly on an EmberKV data directory.

use std::process;

use clap::{Parser, Subcommand};
use emberkv::{Config, EmberError, Engine};
use tracing_subscriber::{fmt, EnvFilter};

/// EmberKV CLI
#[derive(Parser, Debug)]
#[command(name = "emberkv")]
#[command(about = "Embedded LSM key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./emberkv_data")]
    data_dir: String,

    /// MemTable size limit in KB before flush
    #[arg(short = 'm', long, default_value = "16384")]
    memtable_kb: usize,

    /// Compact once more than this many SSTables exist
    #[arg(short, long, default_value = "8")]
    compaction_threshold: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Put {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Remove {
        /// The key to delete
        key: String,
    },

    /// Print live pairs in key order
    Scan {
        /// Start from this key (inclusive)
        #[arg(short, long, default_value = "")]
        from: String,

        /// Stop after this many pairs
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Merge all SSTables into one
    Compact,

    /// Print table and memtable statistics
    Stats,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,emberkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> emberkv::Result<()> {
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .memtable_size_limit(args.memtable_kb * 1024)
        .compaction_threshold(args.compaction_threshold)
        .build();

    let mut engine = Engine::open(config)?;

    match args.command {
        Commands::Get { key } => match engine.get(key.as_bytes()) {
            Ok(value) => println!("{}", String::from_utf8_lossy(&value)),
            Err(EmberError::NotFound) => {
                eprintln!("(not found)");
                process::exit(2);
            }
            Err(e) => return Err(e),
        },
        Commands::Put { key, value } => {
            engine.upsert(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Remove { key } => {
            engine.remove(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, limit } => {
            let records = engine.iter(from.as_bytes());
            for (key, value) in records.take(limit.unwrap_or(usize::MAX)) {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
        Commands::Compact => {
            engine.compact()?;
            println!("OK ({} SSTables)", engine.sstable_count());
        }
        Commands::Stats => {
            println!("sstables:         {}", engine.sstable_count());
            println!("memtable entries: {}", engine.memtable_entry_count());
            println!("memtable bytes:   {}", engine.memtable_size());
        }
    }

    // Persist anything still buffered
    engine.close()
}
