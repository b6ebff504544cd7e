use clap::Parser;

use scour_core::gc::{self, GcOptions, GcStats};
use scour_core::lock;
use scour_storage::{S3Store, UrlStyle};

/// SigV4 needs a region even when the endpoint is explicit.
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Parser)]
#[command(
    name = "scour",
    version,
    about = "Garbage collector and integrity checker for S3-backed chunk stores"
)]
struct Cli {
    /// S3 endpoint without https/http, host:port
    #[arg(long)]
    endpoint: String,

    /// Use SSL for the endpoint connection
    #[arg(long)]
    usessl: bool,

    /// Bucket to perform garbage collection on
    #[arg(long)]
    bucket: String,

    /// S3 access key ID
    #[arg(long)]
    accesskey: String,

    /// S3 secret key, discouraged, use a file if possible
    #[arg(long, conflicts_with = "secretkeyfile")]
    secretkey: Option<String>,

    /// Read the S3 secret key from a file
    #[arg(long)]
    secretkeyfile: Option<String>,

    /// Number of days to keep backups for
    #[arg(long, default_value_t = 60)]
    retention: u32,

    /// Bucket lookup type
    #[arg(long, value_enum, default_value = "auto")]
    lookuptype: LookupType,

    /// Debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum LookupType {
    Auto,
    Dns,
    Path,
}

impl LookupType {
    /// Explicit endpoints default to path-style addressing; `dns` selects
    /// virtual-host.
    fn url_style(self) -> UrlStyle {
        match self {
            LookupType::Auto | LookupType::Path => UrlStyle::Path,
            LookupType::Dns => UrlStyle::VirtualHost,
        }
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let secret_key = match resolve_secret(&cli) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let store = match S3Store::new(
        &cli.endpoint,
        cli.usessl,
        &cli.bucket,
        DEFAULT_REGION,
        cli.lookuptype.url_style(),
        &cli.accesskey,
        &secret_key,
    ) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let opts = GcOptions {
        endpoint: cli.endpoint,
        bucket: cli.bucket,
        retention_days: cli.retention,
        lock_timeout: lock::ACQUIRE_TIMEOUT,
    };

    match gc::run(&store, &opts) {
        Ok(stats) => print_summary(&stats),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// Resolve the secret key from the flag or the key file (trimmed of
/// spaces, tabs, CR and LF).
fn resolve_secret(cli: &Cli) -> Result<String, String> {
    if let Some(ref key) = cli.secretkey {
        return Ok(key.clone());
    }
    let Some(ref path) = cli.secretkeyfile else {
        return Err("one of --secretkey or --secretkeyfile is required".into());
    };
    let data = std::fs::read_to_string(path).map_err(|e| format!("reading key file {path}: {e}"))?;
    Ok(data.trim_matches([' ', '\t', '\r', '\n'].as_slice()).to_string())
}

fn print_summary(stats: &GcStats) {
    println!("Garbage collection finished:");
    println!(
        "  Snapshots: {} total, {} deleted, {} protected, {} marked corrupt",
        stats.snapshots_total,
        stats.snapshots_deleted,
        stats.snapshots_protected,
        stats.snapshots_marked_corrupt,
    );
    println!("  Indexed objects removed: {}", stats.indexed_removed);
    println!(
        "  Chunks: {} referenced, {} kept, {} removed, {} missing",
        stats.chunks_referenced, stats.chunks_kept, stats.chunks_removed, stats.chunks_missing,
    );
    if stats.removal_errors > 0 {
        println!("  Removal errors: {} (see log)", stats.removal_errors);
    }
}
