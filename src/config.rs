use crate::error::BridgeError;
use chrono::Utc;
use derive_more::Constructor;
use std::{
    convert::Infallible,
    str::FromStr,
};

/// The InfluxDB measurement every record is written to.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Deref, derive_more::Display)]
#[repr(transparent)]
pub struct Measurement(String);

impl Measurement {
    /// Blank names are rejected.
    pub fn new(name: impl Into<String>) -> Result<Self, BridgeError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(BridgeError::MissingConfiguration("measurement name"));
        }
        Ok(Self(name))
    }
}

impl FromStr for Measurement {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// The metric name prefixes worth converting, in the order they were given.
///
/// Parsed from a comma separated list. Entries are trimmed and blank entries are dropped,
/// so an empty list makes nothing relevant.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    derive_more::Deref,
    derive_more::From,
)]
#[repr(transparent)]
pub struct RelevantPrefixes(Vec<String>);

impl FromStr for RelevantPrefixes {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let prefixes = s
            .split(',')
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
            .map(String::from)
            .collect::<Vec<_>>();
        Ok(Self(prefixes))
    }
}

/// Nanoseconds since the Unix epoch.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    derive_more::Display,
    derive_more::From,
)]
#[repr(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Read the wall clock. Called once per run, every record of the run shares the result.
    pub fn now() -> Result<Self, BridgeError> {
        Utc::now()
            .timestamp_nanos_opt()
            .map(Self)
            .ok_or(BridgeError::Clock)
    }
}

/// Everything a conversion run needs. Immutable once built.
#[derive(Debug, Clone, Constructor)]
pub struct BridgeConfig {
    pub measurement: Measurement,
    pub prefixes: RelevantPrefixes,
    pub timestamp: Timestamp,
}
