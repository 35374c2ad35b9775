//! Platform-side payments for a business date.

use crate::error::{ReconciliationError, Result};
use crate::models::{Channel, PlatformPayment};
use crate::services::metrics::COLLABORATOR_CALL_DURATION;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use service_core::observability::TracedClientExt;
use tracing::{info, instrument};

#[async_trait]
pub trait PlatformSource: Send + Sync {
    async fn fetch_payments(
        &self,
        settlement_date: NaiveDate,
        channel: Channel,
    ) -> Result<Vec<PlatformPayment>>;
}

/// Response body of the payment gateway's internal listing endpoint.
#[derive(Debug, Deserialize)]
struct PaymentsResponse {
    payments: Vec<PlatformPayment>,
}

/// Reads payments from the payment gateway's
/// `GET {base_url}/internal/payments?date=YYYY-MM-DD&channel=...` endpoint.
pub struct HttpPlatformSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlatformSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, settlement_date: NaiveDate, channel: Channel) -> anyhow::Result<Vec<PlatformPayment>> {
        let url = format!(
            "{}/internal/payments?date={}&channel={}",
            self.base_url,
            settlement_date.format("%Y-%m-%d"),
            channel.as_str()
        );

        let response = self
            .client
            .traced_get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("payment gateway returned {}: {}", status, body));
        }

        let body: PaymentsResponse = response
            .json()
            .await
            .context("decoding payment gateway response")?;
        Ok(body.payments)
    }
}

#[async_trait]
impl PlatformSource for HttpPlatformSource {
    #[instrument(skip(self), fields(channel = %channel))]
    async fn fetch_payments(
        &self,
        settlement_date: NaiveDate,
        channel: Channel,
    ) -> Result<Vec<PlatformPayment>> {
        let timer = COLLABORATOR_CALL_DURATION
            .with_label_values(&["platform_fetch"])
            .start_timer();

        let payments = self
            .fetch(settlement_date, channel)
            .await
            .map_err(ReconciliationError::Fetch)?;

        timer.observe_duration();
        info!(count = payments.len(), "Platform payments fetched");
        Ok(payments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_tolerates_missing_optional_fields() {
        let body = r#"{"payments":[{"payment_no":"PAY1","channel_trade_no":"TRD1","amount":1000,"currency":"USD","status":"success"}]}"#;
        let parsed: PaymentsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.payments.len(), 1);
        assert!(parsed.payments[0].order_no.is_none());
        assert!(parsed.payments[0].merchant_id.is_none());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_a_fetch_error() {
        let source = HttpPlatformSource::new(reqwest::Client::new(), "http://127.0.0.1:1/");
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let err = source.fetch_payments(date, Channel::Stripe).await.unwrap_err();
        assert!(matches!(err, ReconciliationError::Fetch(_)));
    }
}
