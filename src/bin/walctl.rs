//! spillwal operator CLI
//!
//! Offline maintenance for a WAL root: recovery, inspection, cleanup,
//! watermark management and stale-lock removal.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use spillwal::{
    CallbackError, Config, PersistedLsnStore, ProcessLock, RecoveryScanner, StreamConsumer,
    StreamOptions, Streamer, TailPolicy, WalCleaner, WalRecord,
};
use tracing_subscriber::{fmt, EnvFilter};

/// spillwal CLI
#[derive(Parser, Debug)]
#[command(name = "spillwal-ctl")]
#[command(about = "Maintenance tool for spillwal write-ahead logs")]
#[command(version)]
struct Args {
    /// WAL root directory
    #[arg(short, long, default_value = "./spillwal_data")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate every segment and rebuild sidecars
    Recover {
        /// What to do with a bad tail frame
        #[arg(short, long, value_enum, default_value = "strict")]
        policy: PolicyArg,
    },

    /// Print records after an LSN
    Dump {
        /// Only records with LSN greater than this
        #[arg(short, long)]
        after: Option<u64>,

        /// Stop after this LSN
        #[arg(short, long)]
        up_to: Option<u64>,

        /// Skip CRC verification
        #[arg(long)]
        no_verify: bool,
    },

    /// Trash and purge segments covered by the persisted LSN
    Clean {
        /// Seconds trashed segments are kept before purge
        #[arg(short, long, default_value = "600")]
        grace_secs: u64,

        /// Eligible sealed segments retained anyway
        #[arg(short, long, default_value = "1")]
        keep_last: usize,

        /// Report selection without touching files
        #[arg(long)]
        dry_run: bool,
    },

    /// Read or set the persisted LSN
    Watermark {
        #[command(subcommand)]
        action: WatermarkAction,
    },

    /// Remove a lock left behind by a crashed process
    Unlock {
        /// Lock role (e.g. "write", "cleaner")
        role: String,
    },
}

#[derive(Subcommand, Debug)]
enum WatermarkAction {
    /// Print the persisted LSN
    Get,

    /// Set the persisted LSN if greater than the current one
    Set { lsn: u64 },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Strict,
    Salvage,
}

impl From<PolicyArg> for TailPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Strict => TailPolicy::StrictTruncate,
            PolicyArg::Salvage => TailPolicy::SalvageContinue,
        }
    }
}

/// Prints each record on one line
struct PrintConsumer {
    after: Option<u64>,
}

impl StreamConsumer for PrintConsumer {
    fn last_applied_lsn(&self) -> Option<u64> {
        self.after
    }

    fn consume(&mut self, lsn: u64, record: WalRecord) -> Result<(), CallbackError> {
        let bytes: usize = record.events().iter().map(Vec::len).sum();
        println!(
            "{lsn}\t{:?}\tevents={}\tbytes={bytes}",
            record.family(),
            record.event_count()
        );
        Ok(())
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,spillwal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    tracing::debug!("spillwal-ctl v{}", spillwal::VERSION);

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> spillwal::Result<()> {
    let root = args.root;
    match args.command {
        Commands::Recover { policy } => {
            let report = RecoveryScanner::recover(&root, policy.into())?;
            println!(
                "segments={} records={} highest_lsn={:?} truncated_at={:?}",
                report.segments.len(),
                report.records_recovered(),
                report.highest_valid_lsn,
                report.truncate_offset
            );
        }
        Commands::Dump {
            after,
            up_to,
            no_verify,
        } => {
            let options = StreamOptions {
                verify_crc: !no_verify,
                up_to_lsn: up_to,
                ..StreamOptions::default()
            };
            let mut consumer = PrintConsumer { after };
            let report = Streamer::stream(&root, &mut consumer, &options)?;
            eprintln!(
                "delivered={} last_lsn={:?} segments={}",
                report.records_delivered, report.last_delivered_lsn, report.segments_visited
            );
        }
        Commands::Clean {
            grace_secs,
            keep_last,
            dry_run,
        } => {
            let config = Config::builder()
                .root_dir(&root)
                .grace_period(Duration::from_secs(grace_secs))
                .keep_last_sealed(keep_last)
                .dry_run(dry_run)
                .build();
            let report = WalCleaner::new(&config).run()?;
            for path in &report.selected {
                println!("{}{}", if dry_run { "would trash " } else { "trashed " }, path.display());
            }
            for path in &report.purged {
                println!("purged {}", path.display());
            }
        }
        Commands::Watermark { action } => {
            let store = PersistedLsnStore::open(&root);
            match action {
                WatermarkAction::Get => match store.read()? {
                    Some(lsn) => println!("{lsn}"),
                    None => println!("none"),
                },
                WatermarkAction::Set { lsn } => {
                    let moved = store.update_if_greater(lsn)?;
                    println!("{}", if moved { "updated" } else { "unchanged" });
                }
            }
        }
        Commands::Unlock { role } => {
            let removed = ProcessLock::force_release(&root, &role)?;
            println!("{}", if removed { "removed" } else { "not held" });
        }
    }
    Ok(())
}
