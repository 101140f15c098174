//! Offline password reset for a tracker account.
//!
//! Usage: `reset_password <username> <new password>`
//!
//! Uses the database named by `TRACKER_DB_PATH`, like the server.

use std::env;
use std::process;
use std::sync::Arc;

use sample_tracker::config::Config;
use sample_tracker::database::Database;
use sample_tracker::mailer::LogNotifier;
use sample_tracker::tracker::Tracker;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <username> <new password>", args[0]);
        process::exit(2);
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let result = Database::open(&config.db_path).and_then(|db| {
        let tracker = Tracker::new(db, Arc::new(LogNotifier), None);
        tracker.reset_password(&args[1], &args[2])
    });

    match result {
        Ok(()) => println!("Password for '{}' was updated.", args[1]),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
