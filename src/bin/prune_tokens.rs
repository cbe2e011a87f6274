use std::{error::Error, path::Path, process::exit};

use clap::Parser;
use rusqlite::Connection;
use time::{Duration, OffsetDateTime};

use cashbook_rs::{delete_expired_tokens, initialize_db};

/// A utility for deleting access tokens that have expired.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// File path to the application SQLite database.
    #[arg(long)]
    db_path: String,

    /// Only delete tokens that expired at least this many hours ago.
    #[arg(long, default_value_t = 24)]
    hours: u32,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let db_path = Path::new(&args.db_path);

    if !db_path.is_file() {
        eprintln!("File does not exist at {db_path:#?}!");
        exit(1);
    }

    let conn = Connection::open(db_path)?;
    initialize_db(&conn)?;

    let cutoff = OffsetDateTime::now_utc() - Duration::hours(args.hours.into());
    let deleted = delete_expired_tokens(cutoff, &conn)?;

    println!("Deleted {deleted} token(s) that expired before {cutoff}.");

    Ok(())
}
