use std::fmt::Display;

#[derive(Debug)]
pub enum CliError {
    Io {
        source: String,
        path: Option<String>,
    },
    ParseError {
        msg: String,
    },
    Config {
        source: String,
    },
    Analysis {
        msg: String,
    },
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(x: serde_json::Error) -> Self {
        Self::ParseError { msg: x.to_string() }
    }
}

impl From<aprange::AnalysisError> for CliError {
    fn from(x: aprange::AnalysisError) -> Self {
        Self::Analysis { msg: x.to_string() }
    }
}

impl From<aprange::ValidationError> for CliError {
    fn from(x: aprange::ValidationError) -> Self {
        Self::Analysis { msg: x.to_string() }
    }
}

impl From<csv::Error> for CliError {
    fn from(x: csv::Error) -> Self {
        Self::Io {
            source: x.to_string(),
            path: None,
        }
    }
}
