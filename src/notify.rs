use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::DetectorConfig;
use crate::detector::Alert;

/// Maximum alert lines batched into one message.
pub const MAX_ALERT_LINES: usize = 50;

/// Delivery timeout for the single outbound POST.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Webhook notifier. Fires at most one message per run; without a configured
/// URL every call is a no-op. Delivery failure is logged, never fatal.
pub struct Notifier {
    webhook_url: Option<Url>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook_url: Option<&str>) -> Result<Self> {
        let webhook_url = match webhook_url {
            Some(raw) => Some(Url::parse(raw)?),
            None => None,
        };
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;
        Ok(Self { webhook_url, http })
    }

    /// Deliver `text` as a single `{"text": ...}` payload, fire-and-forget.
    pub async fn notify(&self, text: &str) {
        let Some(url) = &self.webhook_url else {
            debug!("No webhook configured, skipping notification");
            return;
        };
        match self
            .http
            .post(url.clone())
            .json(&json!({ "text": text }))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                info!("Notification delivered");
            }
            Ok(response) => {
                warn!("Notification rejected: HTTP {}", response.status());
            }
            Err(e) => {
                warn!("Notification delivery failed: {e}");
            }
        }
    }
}

fn fmt_rank(avg_rank: Option<f64>) -> String {
    match avg_rank {
        Some(rank) => format!("{rank:.2}"),
        None => "-".to_string(),
    }
}

/// Format all of a run's alerts into one message, capped at
/// [`MAX_ALERT_LINES`] lines.
pub fn format_alert_message(alerts: &[Alert], config: &DetectorConfig) -> String {
    let mut lines = vec!["🚨 *Keyword top-rank streak detected* (API avgRnk)".to_string()];
    for alert in alerts.iter().take(MAX_ALERT_LINES) {
        lines.push(format!(
            "- `{}` [{}] : streak={}, avgRnk={}, imp={} (threshold: avgRnk<={}, imp>={})",
            alert.keyword,
            alert.device,
            alert.streak,
            fmt_rank(alert.avg_rank),
            alert.impressions,
            config.rank_threshold,
            config.min_impressions,
        ));
    }
    lines.join("\n")
}
