//! HTTP device status client

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{DeviceState, DeviceStatus};
use crate::db::DeviceRecord;
use crate::{Error, Result};

/// Path of the status document on every device
pub const STATUS_PATH: &str = "status";

/// Talks to devices over their HTTP interface
#[derive(Clone)]
pub struct HttpDeviceClient {
    client: reqwest::Client,
}

impl HttpDeviceClient {
    /// Create a client whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    /// URL of the status document for a device base URL
    ///
    /// # Errors
    ///
    /// Returns error if `base` is not a valid URL
    pub fn status_url(base: &str) -> Result<Url> {
        let base = Url::parse(base).map_err(|e| Error::Device(format!("invalid url '{base}': {e}")))?;
        base.join(STATUS_PATH)
            .map_err(|e| Error::Device(format!("invalid status url: {e}")))
    }
}

#[async_trait]
impl DeviceStatus for HttpDeviceClient {
    async fn fetch_state(&self, record: &DeviceRecord) -> Result<DeviceState> {
        let url = Self::status_url(&record.url)?;
        tracing::trace!(name = %record.name, %url, "fetching device state");

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Device(format!(
                "{} answered {}",
                record.name,
                response.status()
            )));
        }

        Ok(response.json::<DeviceState>().await?)
    }
}
