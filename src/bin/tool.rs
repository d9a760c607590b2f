//! hashkv Tool
//!
//! Command-line interface for a local hashkv store.

use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use hashkv::{Config, Engine, HashKvError};
use tracing_subscriber::{fmt, EnvFilter};

/// hashkv tool
#[derive(Parser, Debug)]
#[command(name = "hashkv-tool")]
#[command(about = "Inspect and load a hashkv store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./hashkv_data")]
    path: String,

    /// Store name
    #[arg(short, long, default_value = "hashkv")]
    name: String,

    /// Hash table size (only used when creating a store)
    #[arg(long, default_value = "1021")]
    htsize: usize,

    /// Page size in bytes (only used when creating a store)
    #[arg(long, default_value = "4096")]
    pgsize: usize,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

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
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Load generated keys and print `count,elapsed_us` per interval
    Test {
        /// Number of keys to set
        #[arg(short = 'n', long, default_value = "1000")]
        keys: u64,

        /// Keys per timing line
        #[arg(short, long, default_value = "100")]
        interval: u64,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "debug,hashkv=trace"
    } else {
        "warn,hashkv=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::builder()
        .data_dir(&args.path)
        .name(&args.name)
        .hash_table_size(args.htsize)
        .page_size(args.pgsize)
        .build();

    let engine = match Engine::open(config) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&engine, args.command);
    let closed = engine.close();

    match result.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        Err(HashKvError::KeyNotFound) => {
            eprintln!("key not found");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(engine: &Engine, command: Commands) -> hashkv::Result<()> {
    match command {
        Commands::Get { key } => match engine.get(key.as_bytes())? {
            Some(value) => {
                println!("{}", String::from_utf8_lossy(&value));
                Ok(())
            }
            None => Err(HashKvError::KeyNotFound),
        },
        Commands::Set { key, value } => engine.set(key.as_bytes(), value.as_bytes()),
        Commands::Del { key } => engine.remove(key.as_bytes()),
        Commands::Test { keys, interval } => load_test(engine, keys, interval.max(1)),
    }
}

/// 32-byte key and its reversed, upper-cased value
fn generate_pair(seed: u64) -> (Vec<u8>, Vec<u8>) {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    // splitmix64
    let mut state = seed;
    let mut key = Vec::with_capacity(32);
    for _ in 0..32 {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        key.push(ALPHABET[(z % ALPHABET.len() as u64) as usize]);
    }

    let value = key.iter().rev().map(|c| c.to_ascii_uppercase()).collect();
    (key, value)
}

fn load_test(engine: &Engine, keys: u64, interval: u64) -> hashkv::Result<()> {
    let mut batch = 0u64;
    let mut start = Instant::now();

    for i in 0..keys {
        if batch == 0 {
            start = Instant::now();
        }

        let (key, value) = generate_pair(i);
        engine.set(&key, &value)?;

        batch += 1;
        if batch == interval {
            println!("{},{}", batch, start.elapsed().as_micros());
            batch = 0;
        }
    }

    if batch > 0 {
        println!("{},{}", batch, start.elapsed().as_micros());
    }
    Ok(())
}
