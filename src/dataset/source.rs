//! Where the raw sheet export comes from.
//!
//! Uses reqwest against a public export URL (Google Sheets `export?format=csv`
//! or an `.xlsx` download link).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;

/// Supplies the raw bytes of the tabular export.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError>;

    /// Human-readable origin for log lines
    fn describe(&self) -> String;
}

pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    timeout_secs: u64,
}

impl HttpSource {
    pub fn new(url: &str, timeout_secs: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl DatasetSource for HttpSource {
    async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
        let timeout_secs = self.timeout_secs;
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout(timeout_secs)
            } else {
                FetchError::from(e)
            }
        };

        let resp = self
            .client
            .get(&self.url)
            .timeout(Duration::from_secs(timeout_secs))
            .send()
            .await
            .map_err(map_err)?;

        if !resp.status().is_success() {
            return Err(FetchError::HttpStatus(resp.status().as_u16()));
        }

        let bytes = resp.bytes().await.map_err(map_err)?;
        Ok(bytes.to_vec())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
