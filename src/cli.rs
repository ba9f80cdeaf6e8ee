use clap::{Parser, Subcommand, ValueEnum};

use crate::progress::ItemKind;

#[derive(Debug, Parser)]
#[command(
    name = "cinetrack",
    version,
    about = "Resume movies and episodes where you left off and track playback progress"
)]
pub struct Cli {
    /// Catalog/progress backend, overrides CINETRACK_BACKEND_URL.
    #[arg(long, global = true, value_name = "URL")]
    pub backend: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Movie,
    Episode,
}

impl From<KindArg> for ItemKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Movie => ItemKind::Movie,
            KindArg::Episode => ItemKind::Episode,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print where playback of an item would resume.
    Resume {
        kind: KindArg,
        id: String,
        #[arg(long)]
        series: Option<String>,
    },
    /// Track a playback session from position samples on stdin.
    Watch {
        #[command(subcommand)]
        target: WatchTarget,
    },
    /// Show the episode that follows one in its season.
    Next {
        #[arg(long)]
        series: String,
        #[arg(long)]
        episode: String,
        #[arg(long)]
        season: Option<u32>,
    },
    /// List a series' episodes by season with local progress.
    Episodes {
        #[arg(long)]
        series: String,
    },
    /// List progress saved on this device.
    List,
    /// Store the bearer token used for remote progress.
    Login {
        #[arg(long)]
        token: String,
    },
    /// Forget the stored bearer token.
    Logout,
}

#[derive(Debug, Subcommand)]
pub enum WatchTarget {
    Movie {
        id: String,
    },
    Episode {
        id: String,
        /// Looked up from the episode when omitted.
        #[arg(long)]
        series: Option<String>,
        #[arg(long)]
        season: Option<u32>,
        /// Keep going with the next episode of the season when one ends.
        #[arg(long)]
        auto_next: bool,
    },
}
