use std::path::PathBuf;

use clap::Parser;

/// Log in to a Moodle site and report the account behind the stored token
#[derive(Parser, Debug)]
#[command(name = "moodle-downloader", author, version, about, long_about = None)]
pub struct Args {
    /// Path to settings file
    ///
    /// Defaults to moodleDownloader/settings.json in the platform config
    /// directory: ~/.config on Linux, ~/Library/Application Support on macOS,
    /// %APPDATA% on Windows.
    #[arg(short, long, env = "MOODLE_DOWNLOADER_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// List of courses to download
    #[arg(short, long, default_value = "all")]
    pub courses: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
