use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wx")]
#[command(about = "Weather site automation - login, favorites and conditions from the command line")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Session identifier; a fresh one is generated when omitted
    #[arg(short, long, global = true, value_name = "ID")]
    pub session: Option<String>,

    /// JSON config file overriding the built-in defaults
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run the browser with a visible window
    #[arg(long, global = true)]
    pub headed: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in to the weather site within the session's context
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Persist the session's cookie state to a file after a successful
        /// login, for later `session restore`
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },

    /// Probe the site for a live authenticated state
    Auth,

    /// Current conditions for a city
    #[command(alias = "wx")]
    Weather { city: String },

    /// Manage favorite locations
    #[command(subcommand)]
    Fav(FavCommand),

    /// Inspect and manage sessions
    #[command(subcommand)]
    Session(SessionCommand),
}

#[derive(Subcommand, Debug)]
pub enum FavCommand {
    /// Add a city to the saved locations
    Add { city: String },
    /// Remove a city from the saved locations
    Remove { city: String },
    /// List the saved locations
    List,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Report active sessions
    List,
    /// Destroy a session and its browsing context
    Destroy { id: String },
    /// Persist a session's cookie state to a file
    Save { id: String, file: PathBuf },
    /// Rebuild a session from a saved snapshot
    Restore { id: String, file: PathBuf },
}
