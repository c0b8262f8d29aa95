use clap::Parser;
use std::path::PathBuf;

/// Automated mass ranging over an exported histogram and range set.
#[derive(Debug, Parser)]
#[command(name = "aprange", version, about)]
pub struct Cli {
    /// JSON configuration file (parameters + input/output locations).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Raw mass histogram (JSON: start, bin_width, counts).
    #[arg(long)]
    pub histogram: Option<PathBuf>,

    /// Starting range set (JSON array of ranges).
    #[arg(long)]
    pub ranges: Option<PathBuf>,

    /// Optional ion event stream (JSON array of chunks) for multi-hit
    /// analysis.
    #[arg(long)]
    pub events: Option<PathBuf>,

    /// Directory for the exported tables.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}
