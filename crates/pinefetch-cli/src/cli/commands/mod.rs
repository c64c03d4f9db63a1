//! CLI command handlers, one file per command.

mod completions;
mod config;
mod download;
mod history;
mod info;
mod version;

pub use completions::{run_completions, run_man};
pub use config::{run_config_set, run_config_show};
pub use download::run_download;
pub use history::run_history;
pub use info::run_info;
pub use version::run_version;
