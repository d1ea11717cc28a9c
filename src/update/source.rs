use std::io::{self, Write};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CACHE_CONTROL;
use url::Url;

use crate::errors::UpdateError;

/// Where manifests and artifacts come from.
pub trait UpdateSource: Send + Sync {
    fn fetch_manifest(&self, url: &Url) -> Result<Vec<u8>, UpdateError>;

    /// Streams the artifact at `url` into `dest`, returning the byte count.
    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64, UpdateError>;
}

pub struct HttpSource {
    client: Client,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self, UpdateError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .user_agent(concat!("devdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(network)?;
        Ok(Self { client, timeout })
    }
}

fn network(err: reqwest::Error) -> UpdateError {
    UpdateError::Network(err.to_string())
}

impl UpdateSource for HttpSource {
    fn fetch_manifest(&self, url: &Url) -> Result<Vec<u8>, UpdateError> {
        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .timeout(self.timeout)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(network)?;
        let body = response.bytes().map_err(network)?;
        if body.is_empty() {
            return Err(UpdateError::Network("no data received".to_string()));
        }
        Ok(body.to_vec())
    }

    fn download(&self, url: &str, dest: &mut dyn Write) -> Result<u64, UpdateError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(network)?;
        let written = io::copy(&mut response, dest)?;
        dest.flush()?;
        Ok(written)
    }
}
