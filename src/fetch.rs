use crate::error::BridgeError;
use reqwest::{
    blocking::{
        Client,
        Response,
    },
    Url,
};
use std::{
    io::BufReader,
    time::Duration,
};
use tracing::{
    debug,
    info,
};

/// Fetches the exposition text from a single HTTP endpoint.
#[derive(Debug, Clone)]
pub struct Scraper {
    client: Client,
    endpoint: Url,
}

impl Scraper {
    /// Build a scraper for `endpoint`.
    ///
    /// Without a `timeout` the request is never aborted: an endpoint which accepts the
    /// connection and never answers blocks the run forever.
    pub fn new(endpoint: Url, timeout: Option<Duration>) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| BridgeError::Fetch {
                endpoint: endpoint.to_string(),
                source,
            })?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Send a single GET request and return a line reader over the response body.
    ///
    /// Non success statuses are reported as failures, their body is never converted.
    pub fn scrape(&self) -> Result<BufReader<Response>, BridgeError> {
        info!(endpoint = %self.endpoint, "scraping metrics");
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .and_then(Response::error_for_status)
            .map_err(|source| BridgeError::Fetch {
                endpoint: self.endpoint.to_string(),
                source,
            })?;
        debug!(status = %response.status(), "endpoint answered");
        Ok(BufReader::new(response))
    }
}
