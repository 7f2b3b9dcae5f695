use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use batch_queue::JobStatus;

#[derive(Parser)]
#[command(name = "batch-queue")]
#[command(about = "Inspect persisted batch-queue state and resolved settings.")]
pub(crate) struct Cli {
    /// Override config directory (default: `$PRJ_CONFIG_HOME` or `.config`).
    #[arg(long, global = true)]
    pub(crate) conf: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum StatusFilter {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl From<StatusFilter> for JobStatus {
    fn from(value: StatusFilter) -> Self {
        match value {
            StatusFilter::Pending => Self::Pending,
            StatusFilter::Running => Self::Running,
            StatusFilter::Completed => Self::Completed,
            StatusFilter::Failed => Self::Failed,
            StatusFilter::Cancelled => Self::Cancelled,
        }
    }
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print job counts by status from a persisted state directory.
    Summary {
        /// State directory (default: resolved from settings)
        #[arg(long)]
        state_dir: Option<PathBuf>,
    },
    /// List persisted job records as JSON, oldest first.
    Jobs {
        /// State directory (default: resolved from settings)
        #[arg(long)]
        state_dir: Option<PathBuf>,

        /// Only list jobs in this status.
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,
    },
    /// Print the resolved queue configuration.
    Settings,
}
