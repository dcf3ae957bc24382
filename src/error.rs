use thiserror::Error;

/// Exit code for a missing or invalid command line configuration.
pub const EXIT_USAGE: u8 = 1;
/// Exit code for a scrape that could not be completed.
pub const EXIT_FETCH: u8 = 2;

/// The errors that abort a conversion run.
///
/// Lines that are not relevant samples, and labels that cannot become tags, are not errors:
/// they are skipped.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("missing required configuration: {0}")]
    MissingConfiguration(&'static str),

    #[error("could not scrape metrics from {endpoint}: {source}")]
    Fetch {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not read metrics from {endpoint}: {source}")]
    Read {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("system clock is out of range for a nanosecond timestamp")]
    Clock,
}

impl BridgeError {
    /// The process exit code to report this error with.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::MissingConfiguration(_) | Self::Clock => EXIT_USAGE,
            Self::Fetch { .. } | Self::Read { .. } => EXIT_FETCH,
        }
    }
}
