use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use providers_resolver::{MediaRef, ProviderKind};
use vodio_engine::QualityPreference;

#[derive(Parser, Debug)]
#[command(
    name = "offcast",
    version,
    about = "Resolve catalog media to playable streams and download them for offline playback"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Directory holding the durable state file; state is in-memory when omitted
    #[arg(long, global = true, env = "OFFCAST_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Root directory downloads are placed under
    #[arg(
        long,
        global = true,
        default_value = "downloads",
        env = "OFFCAST_OUT_DIR"
    )]
    pub out_dir: PathBuf,
}

impl Args {
    /// Output format of the selected command, for format-aware error
    /// reporting.
    pub fn output_format(&self) -> Option<OutputFormat> {
        match &self.command {
            Commands::Resolve { output, .. }
            | Commands::Download { output, .. }
            | Commands::Jobs { output } => Some(*output),
            Commands::Progress { .. } => None,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a catalog reference to a playable stream descriptor
    Resolve {
        #[command(flatten)]
        selection: MediaSelection,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Resolve a catalog reference and download it for offline playback
    Download {
        #[command(flatten)]
        selection: MediaSelection,

        /// Variant to keep for adaptive streams: `highest`, `sdr`, or a
        /// height cap such as `720`
        #[arg(long, default_value = "highest", value_parser = parse_quality)]
        quality: QualityPreference,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// List download jobs known to this process
    Jobs {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },

    /// Read or write stored watch positions
    Progress {
        #[command(subcommand)]
        action: ProgressAction,
    },
}

/// Which title (or episode of a title) a command operates on, plus the
/// metadata the upstream providers may need to find it.
#[derive(clap::Args, Debug)]
pub struct MediaSelection {
    /// Catalog identifier of the title
    pub id: String,

    /// Season number (episodes only)
    #[arg(long, requires = "episode")]
    pub season: Option<u32>,

    /// Episode number (episodes only)
    #[arg(long, requires = "season")]
    pub episode: Option<u32>,

    /// Provider to try first: vidora, embedo, nimbus or moonbox
    #[arg(long, value_parser = parse_provider)]
    pub provider: Option<ProviderKind>,

    /// Canonical title, seeding the metadata the providers consult
    #[arg(long)]
    pub title: Option<String>,

    /// Release year of the title
    #[arg(long, requires = "title")]
    pub year: Option<u16>,

    /// Cross-reference identifier some providers are keyed by
    #[arg(long, requires = "title")]
    pub external_id: Option<String>,
}

impl MediaSelection {
    pub fn media_ref(&self) -> MediaRef {
        match (self.season, self.episode) {
            (Some(season), Some(episode)) => MediaRef::episode(&self.id, season, episode),
            _ => MediaRef::movie(&self.id),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ProgressAction {
    /// Print the stored watch position for a key
    Get { key: String },

    /// Store a watch position; positions at or past 90% of the duration
    /// clear the entry instead
    Set {
        key: String,

        /// Playback position in milliseconds
        #[arg(long)]
        position: u64,

        /// Total duration in milliseconds (0 when unknown)
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Drop the stored watch position for a key
    Clear { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Pretty,
    /// Machine-readable JSON
    Json,
}

fn parse_provider(value: &str) -> Result<ProviderKind, String> {
    value.parse().map_err(|_| {
        format!("unknown provider `{value}` (expected vidora, embedo, nimbus or moonbox)")
    })
}

fn parse_quality(value: &str) -> Result<QualityPreference, String> {
    match value.to_ascii_lowercase().as_str() {
        "highest" => Ok(QualityPreference::Highest),
        "sdr" => Ok(QualityPreference::HighestSdr),
        other => other
            .strip_suffix('p')
            .unwrap_or(other)
            .parse::<u32>()
            .map(QualityPreference::Cap)
            .map_err(|_| format!("expected `highest`, `sdr` or a height like `720`, got `{value}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_declaration_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn quality_parses_named_and_numeric_values() {
        assert_eq!(parse_quality("highest").unwrap(), QualityPreference::Highest);
        assert_eq!(parse_quality("SDR").unwrap(), QualityPreference::HighestSdr);
        assert_eq!(parse_quality("720").unwrap(), QualityPreference::Cap(720));
        assert_eq!(parse_quality("1080p").unwrap(), QualityPreference::Cap(1080));
        assert!(parse_quality("best").is_err());
    }

    #[test]
    fn provider_parses_case_insensitively() {
        assert_eq!(parse_provider("Vidora").unwrap(), ProviderKind::Vidora);
        assert!(parse_provider("youtube").is_err());
    }

    #[test]
    fn episode_selection_builds_an_episode_ref() {
        let args = Args::parse_from([
            "offcast", "resolve", "1396", "--season", "1", "--episode", "7",
        ]);
        let Commands::Resolve { selection, .. } = args.command else {
            panic!("expected the resolve command");
        };
        assert_eq!(selection.media_ref().job_key(), "show:1396:s01e07");
    }

    #[test]
    fn bare_id_builds_a_movie_ref() {
        let args = Args::parse_from(["offcast", "download", "603"]);
        let Commands::Download { selection, .. } = args.command else {
            panic!("expected the download command");
        };
        assert_eq!(selection.media_ref().job_key(), "movie:603");
    }
}
