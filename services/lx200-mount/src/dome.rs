//! Dome collaborator interface
//!
//! The dome daemon is told about upcoming telescope motion so it can keep
//! the slit aligned. Every notification is best-effort: failures are
//! logged by the caller and never affect the pointing command's outcome.

use async_trait::async_trait;
use serde_json::json;

use crate::config::DomeConfig;
use crate::error::{MountError, Result};

/// Notifications pushed to the dome daemon
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait DomeNotifier: Send + Sync {
    async fn telescope_stopped(&self) -> Result<()>;

    async fn telescope_parked(&self) -> Result<()>;

    async fn telescope_radec(&self, ra: f64, dec: f64, tracking: bool) -> Result<()>;

    async fn telescope_altaz(&self, alt: f64, az: f64) -> Result<()>;
}

/// Dome notifier posting JSON events to a configured HTTP endpoint
pub struct HttpDomeNotifier {
    url: String,
    client: reqwest::Client,
}

impl HttpDomeNotifier {
    pub fn new(config: &DomeConfig) -> Self {
        Self {
            url: config.url.clone(),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, payload: serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| MountError::Dome(format!("POST {} failed: {}", self.url, e)))?;

        if !response.status().is_success() {
            return Err(MountError::Dome(format!(
                "dome endpoint returned status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DomeNotifier for HttpDomeNotifier {
    async fn telescope_stopped(&self) -> Result<()> {
        self.post(json!({"event": "telescope_stopped"})).await
    }

    async fn telescope_parked(&self) -> Result<()> {
        self.post(json!({"event": "telescope_parked"})).await
    }

    async fn telescope_radec(&self, ra: f64, dec: f64, tracking: bool) -> Result<()> {
        self.post(json!({
            "event": "telescope_radec",
            "ra": ra,
            "dec": dec,
            "tracking": tracking,
        }))
        .await
    }

    async fn telescope_altaz(&self, alt: f64, az: f64) -> Result<()> {
        self.post(json!({
            "event": "telescope_altaz",
            "alt": alt,
            "az": az,
        }))
        .await
    }
}

/// No-op notifier used when no dome is configured
#[derive(Debug, Default, Clone)]
pub struct NoopDomeNotifier;

#[async_trait]
impl DomeNotifier for NoopDomeNotifier {
    async fn telescope_stopped(&self) -> Result<()> {
        Ok(())
    }

    async fn telescope_parked(&self) -> Result<()> {
        Ok(())
    }

    async fn telescope_radec(&self, _ra: f64, _dec: f64, _tracking: bool) -> Result<()> {
        Ok(())
    }

    async fn telescope_altaz(&self, _alt: f64, _az: f64) -> Result<()> {
        Ok(())
    }
}
