use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;

use aprange::RangingParams;

use crate::cli::Cli;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub output: Option<OutputConfig>,
    pub params: RangingParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct InputConfig {
    pub histogram: Option<PathBuf>,
    pub ranges: Option<PathBuf>,
    pub events: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Config {
    /// Command-line flags win over the config file.
    pub fn merge_cli(&mut self, args: &Cli) {
        if let Some(ref p) = args.histogram {
            self.input.histogram = Some(p.clone());
        }
        if let Some(ref p) = args.ranges {
            self.input.ranges = Some(p.clone());
        }
        if let Some(ref p) = args.events {
            self.input.events = Some(p.clone());
        }
        if let Some(ref p) = args.output_dir {
            self.output = Some(OutputConfig {
                directory: p.clone(),
            });
        }
    }
}
