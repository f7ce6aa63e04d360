//! AtlasDBM CLI
//!
//! Inspect and edit a database file from the command line.

use std::io::{self, Write};
use std::process::ExitCode;

use atlasdbm::{Config, Dbm, OpenFlags, OpenMode};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasDBM CLI
#[derive(Parser, Debug)]
#[command(name = "atlasdbm")]
#[command(about = "Embedded dbm-style key-value store")]
#[command(version)]
struct Args {
    /// Database file
    #[arg(short, long, default_value = "./atlasdbm.db")]
    file: String,

    /// Open read-only (shared lock)
    #[arg(long)]
    reader: bool,

    /// Sync to disk after every mutation
    #[arg(long)]
    sync: bool,

    /// Skip advisory file locking
    #[arg(long)]
    no_lock: bool,

    /// Block size when creating a new file
    #[arg(short, long, default_value_t = atlasdbm::DEFAULT_BLOCK_SIZE)]
    block_size: u32,

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

    /// List every key
    Keys,

    /// Print every key/value pair, tab separated
    Dump,

    /// Count records
    Len,

    /// Rewrite the file without dead space
    Reorganize,

    /// Print library and format version
    Version,
}

impl Commands {
    fn writes(&self) -> bool {
        matches!(
            self,
            Commands::Set { .. } | Commands::Del { .. } | Commands::Reorganize
        )
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging (stderr, so stdout stays scriptable)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlasdbm=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    if let Commands::Version = args.command {
        println!("{}", atlasdbm::engine_version());
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> atlasdbm::Result<ExitCode> {
    let mut flags = OpenFlags::empty();
    if args.sync {
        flags |= OpenFlags::SYNC;
    }
    if args.no_lock {
        flags |= OpenFlags::NOLOCK;
    }

    let mut builder = Config::builder()
        .path(&args.file)
        .block_size(args.block_size)
        .flags(flags);
    if args.reader {
        builder = builder.mode(OpenMode::Reader);
    } else if args.command.writes() {
        builder = builder.mode(OpenMode::WriteCreate);
    }

    let mut db = Dbm::open_with(builder.build())?;
    let mut out = io::stdout().lock();

    let code = match args.command {
        Commands::Get { key } => match db.get(&key)? {
            Some(value) => {
                out.write_all(&value)?;
                writeln!(out)?;
                ExitCode::SUCCESS
            }
            None => {
                tracing::warn!("Key not found: {}", key);
                ExitCode::from(2)
            }
        },
        Commands::Set { key, value } => {
            db.put(&key, &value)?;
            ExitCode::SUCCESS
        }
        Commands::Del { key } => match db.delete(&key)? {
            Some(_) => ExitCode::SUCCESS,
            None => {
                tracing::warn!("Key not found: {}", key);
                ExitCode::from(2)
            }
        },
        Commands::Keys => {
            for key in db.keys_iter()? {
                out.write_all(&key?)?;
                writeln!(out)?;
            }
            ExitCode::SUCCESS
        }
        Commands::Dump => {
            for pair in db.iter()? {
                let (key, value) = pair?;
                out.write_all(&key)?;
                out.write_all(b"\t")?;
                out.write_all(&value)?;
                writeln!(out)?;
            }
            ExitCode::SUCCESS
        }
        Commands::Len => {
            writeln!(out, "{}", db.len()?)?;
            ExitCode::SUCCESS
        }
        Commands::Reorganize => {
            let stats = db.reorganize()?;
            writeln!(
                out,
                "{} records, {} -> {} bytes",
                stats.records, stats.bytes_before, stats.bytes_after
            )?;
            ExitCode::SUCCESS
        }
        Commands::Version => ExitCode::SUCCESS,
    };

    db.close()?;
    Ok(code)
}
