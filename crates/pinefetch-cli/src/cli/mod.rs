//! CLI for the Pinefetch download queue.

mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use pinefetch_core::ConfigStore;
use std::path::PathBuf;
use std::sync::Arc;

use commands::{
    run_completions, run_config_set, run_config_show, run_download, run_history, run_info,
    run_man, run_version,
};

/// Top-level CLI for Pinefetch.
#[derive(Debug, Parser)]
#[command(name = "pinefetch", version)]
#[command(about = "Pinefetch: queue media downloads through yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue one or more URLs and follow them until they finish.
    Download(DownloadArgs),

    /// Show or change the stored configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the installed downloader version.
    Version {
        /// Probe this executable instead of the configured one.
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Show title, uploader, duration and formats for a URL without downloading.
    Info {
        /// Page or media URL.
        url: String,
    },

    /// List recent job outcomes.
    History {
        /// Number of rows to show.
        #[arg(long, short = 'n', default_value = "20", value_name = "N")]
        limit: u32,
    },

    /// Print shell completions to stdout.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },

    /// Print the man page (roff) to stdout.
    Man,
}

#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Page or media URLs (http/https).
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Downloader format selector.
    #[arg(long, short = 'f', default_value = "best")]
    pub format: String,

    /// Output directory (defaults to the configured one).
    #[arg(long, short = 'o', value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Keep only the audio track.
    #[arg(long)]
    pub extract_audio: bool,

    /// Audio codec for --extract-audio, e.g. mp3 or m4a.
    #[arg(long, value_name = "FMT", requires = "extract_audio")]
    pub audio_format: Option<String>,

    /// Write a text transcript next to each download.
    #[arg(long)]
    pub transcribe: bool,

    /// Run up to N downloads at once (overrides the config for this run).
    #[arg(long, short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Print every queue event as a JSON line.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the current configuration and its file path.
    Show,

    /// Update settings. An empty value resets a path to its default.
    Set {
        #[arg(long, value_name = "PATH")]
        executable_path: Option<PathBuf>,
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,
        #[arg(long, value_name = "PATH")]
        ffmpeg_location: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        transcriber_path: Option<PathBuf>,
        /// Transcription model name.
        #[arg(long, value_name = "NAME")]
        model: Option<String>,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        match cli.command {
            CliCommand::Completions { shell } => return run_completions(shell),
            CliCommand::Man => return run_man(),
            _ => {}
        }

        let store = Arc::new(ConfigStore::open_default()?);
        tracing::debug!("loaded config: {:?}", store.get());

        match cli.command {
            CliCommand::Download(args) => run_download(store, args).await?,
            CliCommand::Config { action } => match action {
                ConfigAction::Show => run_config_show(&store)?,
                ConfigAction::Set {
                    executable_path,
                    output_dir,
                    max_concurrent,
                    ffmpeg_location,
                    transcriber_path,
                    model,
                } => run_config_set(
                    &store,
                    pinefetch_core::ConfigPatch {
                        executable_path,
                        default_output_dir: output_dir,
                        max_concurrent_jobs: max_concurrent,
                        ffmpeg_location,
                        transcriber_path,
                        transcription_model: model,
                        terminate_grace_secs: None,
                    },
                )?,
            },
            CliCommand::Version { path } => run_version(path.as_deref(), &store).await?,
            CliCommand::Info { url } => run_info(&url, &store).await?,
            CliCommand::History { limit } => run_history(limit).await?,
            CliCommand::Completions { .. } | CliCommand::Man => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
