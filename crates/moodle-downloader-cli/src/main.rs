//! Moodle Downloader - command line front end.
//!
//! Logs in to the configured Moodle site, renewing the cached token when the
//! site no longer accepts it, and prints the account it belongs to.

mod cli;

use std::io;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use moodle_downloader_core::settings::expand_tilde;
use moodle_downloader_core::{CredentialManager, Login, MoodleClient, SettingsStore, TokenSource};

use cli::Args;

/// Initialize the tracing subscriber for logging
fn init_tracing(verbose: u8) {
    // -v wins over RUST_LOG; without it RUST_LOG decides, defaulting to info
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let settings_path = match args.settings {
        Some(ref path) => expand_tilde(path),
        None => SettingsStore::default_path()?,
    };
    info!(path = %settings_path.display(), "Using settings file");
    debug!(courses = %args.courses, "Course selection");

    let store = SettingsStore::new(settings_path);
    let client = MoodleClient::new().context("Failed to build HTTP client")?;
    let manager = CredentialManager::new(client);

    let login = manager.acquire(&store).await.context("Login failed")?;

    if let Some(ref e) = login.persist_error {
        eprintln!("Warning: new token could not be saved: {}", e);
    }

    print_login(&login);
    Ok(())
}

fn print_login(login: &Login) {
    let origin = match login.source {
        TokenSource::Cached => "cached token",
        TokenSource::Renewed => "new token",
    };
    info!("Logged in with {}", origin);

    if let Some(ref site) = login.site.site_name {
        println!("Site: {}", site);
    }
    if let Some(ref name) = login.site.full_name {
        println!("User: {}", name);
    }
    println!("UserID: {}", login.user_id());
}
