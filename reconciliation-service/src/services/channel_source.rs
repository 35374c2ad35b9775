//! Settlement file retrieval and parsing.

use crate::error::{ReconciliationError, Result};
use crate::models::{generate_file_no, Channel, ChannelPayment, DownloadedFile};
use crate::services::metrics::COLLABORATOR_CALL_DURATION;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use service_core::observability::TracedClientExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Where channel-side settlement data comes from.
#[async_trait]
pub trait ChannelSource: Send + Sync {
    /// Fetch the settlement file for (channel, date) and store it locally.
    async fn download(&self, channel: Channel, settlement_date: NaiveDate) -> Result<DownloadedFile>;

    /// Parse a previously downloaded file into channel payments.
    async fn parse(&self, file_url: &str) -> Result<Vec<ChannelPayment>>;
}

/// Pulls settlement CSVs over HTTP from
/// `{base_url}/settlements/{channel}/{YYYY-MM-DD}` into `settlement_dir`.
pub struct HttpChannelSource {
    client: reqwest::Client,
    base_url: String,
    settlement_dir: PathBuf,
}

impl HttpChannelSource {
    pub fn new(client: reqwest::Client, base_url: &str, settlement_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            settlement_dir: settlement_dir.into(),
        }
    }

    async fn fetch(&self, channel: Channel, settlement_date: NaiveDate) -> anyhow::Result<DownloadedFile> {
        let url = format!(
            "{}/settlements/{}/{}",
            self.base_url,
            channel.as_str(),
            settlement_date.format("%Y-%m-%d")
        );

        let response = self
            .client
            .traced_get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("GET {} returned {}", url, status));
        }

        let body = response.bytes().await.context("reading settlement body")?;

        tokio::fs::create_dir_all(&self.settlement_dir)
            .await
            .with_context(|| format!("creating {}", self.settlement_dir.display()))?;

        let path = self
            .settlement_dir
            .join(format!("{}.csv", generate_file_no(channel, settlement_date)));
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        Ok(DownloadedFile {
            file_url: path.to_string_lossy().into_owned(),
            file_size: body.len() as i64,
            file_hash: hex::encode(Sha256::digest(&body)),
        })
    }
}

#[async_trait]
impl ChannelSource for HttpChannelSource {
    #[instrument(skip(self), fields(channel = %channel, settlement_date = %settlement_date))]
    async fn download(&self, channel: Channel, settlement_date: NaiveDate) -> Result<DownloadedFile> {
        let timer = COLLABORATOR_CALL_DURATION
            .with_label_values(&["channel_download"])
            .start_timer();

        let file = self
            .fetch(channel, settlement_date)
            .await
            .map_err(ReconciliationError::Download)?;

        timer.observe_duration();
        info!(
            file_url = %file.file_url,
            file_size = file.file_size,
            "Settlement file downloaded"
        );
        Ok(file)
    }

    #[instrument(skip(self))]
    async fn parse(&self, file_url: &str) -> Result<Vec<ChannelPayment>> {
        let timer = COLLABORATOR_CALL_DURATION
            .with_label_values(&["channel_parse"])
            .start_timer();

        let data = tokio::fs::read(file_url)
            .await
            .with_context(|| format!("opening {}", file_url))
            .map_err(ReconciliationError::Parse)?;
        let payments = parse_settlement_csv(&data).map_err(ReconciliationError::Parse)?;

        timer.observe_duration();
        info!(count = payments.len(), "Settlement file parsed");
        Ok(payments)
    }
}

const TRADE_NO_COLUMNS: &[&str] = &["id", "channel_trade_no", "trade_no"];
const AMOUNT_COLUMNS: &[&str] = &["amount"];
const CURRENCY_COLUMNS: &[&str] = &["currency"];
const STATUS_COLUMNS: &[&str] = &["status"];
const SETTLED_COLUMNS: &[&str] = &["created", "settled_at"];

/// Parse a settlement CSV with a header row.
///
/// Amounts are integer minor units; an empty amount cell reads as 0. The
/// settlement time accepts unix seconds or RFC 3339 and is dropped when
/// unreadable.
pub fn parse_settlement_csv(data: &[u8]) -> anyhow::Result<Vec<ChannelPayment>> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let columns: HashMap<String, usize> = reader
        .headers()
        .context("reading header row")?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_ascii_lowercase(), i))
        .collect();

    let find = |aliases: &[&str]| aliases.iter().find_map(|a| columns.get(*a).copied());
    let trade_no_idx = find(TRADE_NO_COLUMNS)
        .ok_or_else(|| anyhow!("missing trade number column (id or channel_trade_no)"))?;
    let amount_idx = find(AMOUNT_COLUMNS).ok_or_else(|| anyhow!("missing amount column"))?;
    let currency_idx = find(CURRENCY_COLUMNS);
    let status_idx = find(STATUS_COLUMNS);
    let settled_idx = find(SETTLED_COLUMNS);

    let mut payments = Vec::new();
    for (idx, row) in reader.records().enumerate() {
        let line = idx + 2;
        let record = row.with_context(|| format!("reading line {}", line))?;
        let field = |i: Option<usize>| i.and_then(|i| record.get(i)).unwrap_or("");

        let channel_trade_no = field(Some(trade_no_idx));
        if channel_trade_no.is_empty() {
            return Err(anyhow!("line {}: empty trade number", line));
        }

        let amount_cell = field(Some(amount_idx));
        let amount = if amount_cell.is_empty() {
            0
        } else {
            amount_cell
                .parse::<i64>()
                .with_context(|| format!("line {}: invalid amount {:?}", line, amount_cell))?
        };

        payments.push(ChannelPayment {
            channel_trade_no: channel_trade_no.to_string(),
            amount,
            currency: field(currency_idx).to_ascii_uppercase(),
            status: map_channel_status(field(status_idx)),
            settled_at: parse_settled_at(field(settled_idx)),
        });
    }

    Ok(payments)
}

/// Translate channel vocabulary into platform payment statuses.
pub fn map_channel_status(status: &str) -> String {
    match status.to_ascii_lowercase().as_str() {
        "succeeded" | "success" | "paid" => "success".to_string(),
        "pending" => "pending".to_string(),
        "failed" => "failed".to_string(),
        "refunded" => "refunded".to_string(),
        _ => status.to_string(),
    }
}

fn parse_settled_at(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    if let Ok(secs) = value.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
