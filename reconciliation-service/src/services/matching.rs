//! Three-way matching of platform payments against channel settlement rows.
//!
//! Pure functions only: the orchestrator owns every side effect.

use crate::error::{ReconciliationError, Result};
use crate::models::{
    ChannelPayment, DiffType, PlatformPayment, ReconciliationRecord, ReconciliationTask,
    TaskAggregates,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of comparing one platform payment with its channel counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub diff_type: DiffType,
    pub diff_amount: i64,
    pub reason: String,
}

/// One output row of the matcher, not yet bound to a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub payment_no: Option<String>,
    pub channel_trade_no: String,
    pub order_no: Option<String>,
    pub merchant_id: Option<Uuid>,
    pub platform_amount: i64,
    pub channel_amount: i64,
    pub diff_amount: i64,
    pub currency: String,
    pub platform_status: Option<String>,
    pub channel_status: Option<String>,
    pub diff_type: DiffType,
    pub diff_reason: String,
    pub is_resolved: bool,
}

impl DiffRecord {
    pub fn into_record(self, task: &ReconciliationTask, now: DateTime<Utc>) -> ReconciliationRecord {
        ReconciliationRecord {
            record_id: Uuid::new_v4(),
            task_id: task.task_id,
            task_no: task.task_no.clone(),
            payment_no: self.payment_no,
            channel_trade_no: self.channel_trade_no,
            order_no: self.order_no,
            merchant_id: self.merchant_id,
            platform_amount: self.platform_amount,
            channel_amount: self.channel_amount,
            diff_amount: self.diff_amount,
            currency: self.currency,
            platform_status: self.platform_status,
            channel_status: self.channel_status,
            diff_type: self.diff_type.as_str().to_string(),
            diff_reason: self.diff_reason,
            is_resolved: self.is_resolved,
            resolved_by: None,
            resolved_at: None,
            resolution_note: None,
            created_at: now,
        }
    }

    fn platform_only(p: &PlatformPayment) -> Self {
        Self {
            payment_no: Some(p.payment_no.clone()),
            channel_trade_no: p.channel_trade_no.clone(),
            order_no: p.order_no.clone(),
            merchant_id: p.merchant_id,
            platform_amount: p.amount,
            channel_amount: 0,
            diff_amount: p.amount,
            currency: p.currency.clone(),
            platform_status: Some(p.status.clone()),
            channel_status: None,
            diff_type: DiffType::PlatformOnly,
            diff_reason: "no corresponding channel record".to_string(),
            is_resolved: false,
        }
    }

    fn channel_only(c: &ChannelPayment) -> Result<Self> {
        let diff_amount = c.amount.checked_neg().ok_or_else(|| {
            ReconciliationError::AmountOverflow(format!(
                "channel amount {} of {} cannot be negated",
                c.amount, c.channel_trade_no
            ))
        })?;
        Ok(Self {
            payment_no: None,
            channel_trade_no: c.channel_trade_no.clone(),
            order_no: None,
            merchant_id: None,
            platform_amount: 0,
            channel_amount: c.amount,
            diff_amount,
            currency: c.currency.clone(),
            platform_status: None,
            channel_status: Some(c.status.clone()),
            diff_type: DiffType::ChannelOnly,
            diff_reason: "no corresponding platform record".to_string(),
            is_resolved: false,
        })
    }
}

/// Classify a platform payment against an optional channel row.
///
/// Amount mismatch wins over status mismatch. Amounts compare exactly.
pub fn classify(
    platform: &PlatformPayment,
    channel: Option<&ChannelPayment>,
) -> Result<Classification> {
    let Some(channel) = channel else {
        return Ok(Classification {
            diff_type: DiffType::PlatformOnly,
            diff_amount: platform.amount,
            reason: "no corresponding channel record".to_string(),
        });
    };

    let mut classification = if platform.amount != channel.amount {
        let diff_amount = platform.amount.checked_sub(channel.amount).ok_or_else(|| {
            ReconciliationError::AmountOverflow(format!(
                "difference of platform {} and channel {} for {}",
                platform.amount, channel.amount, platform.channel_trade_no
            ))
        })?;
        Classification {
            diff_type: DiffType::AmountDiff,
            diff_amount,
            reason: format!(
                "amount mismatch: platform {} vs channel {}",
                platform.amount, channel.amount
            ),
        }
    } else if platform.status != channel.status {
        Classification {
            diff_type: DiffType::StatusDiff,
            diff_amount: 0,
            reason: format!(
                "status mismatch: platform {} vs channel {}",
                platform.status, channel.status
            ),
        }
    } else {
        Classification {
            diff_type: DiffType::Matched,
            diff_amount: 0,
            reason: String::new(),
        }
    };

    // The key ignores currency; surface a disagreement without reclassifying.
    // A side that does not report a currency has nothing to disagree with.
    let both_known = !platform.currency.is_empty() && !channel.currency.is_empty();
    if both_known && !platform.currency.eq_ignore_ascii_case(&channel.currency) {
        let note = format!(
            "currency mismatch: platform {} vs channel {}",
            platform.currency, channel.currency
        );
        classification.reason = if classification.reason.is_empty() {
            note
        } else {
            format!("{}; {}", classification.reason, note)
        };
    }

    Ok(classification)
}

/// Join `platform` against `channel` on `channel_trade_no`.
///
/// Every input row shows up in exactly one output record. Platform rows come
/// first in input order, then unconsumed channel rows in input order. A
/// channel row is consumed at most once; repeated trade numbers on either side
/// fall out as one-sided diffs.
pub fn match_records(
    platform: &[PlatformPayment],
    channel: &[ChannelPayment],
) -> Result<Vec<DiffRecord>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(channel.len());
    for (i, c) in channel.iter().enumerate() {
        index.entry(c.channel_trade_no.as_str()).or_insert(i);
    }

    let mut consumed = vec![false; channel.len()];
    let mut out = Vec::with_capacity(platform.len() + channel.len());

    for p in platform {
        let hit = index
            .get(p.channel_trade_no.as_str())
            .copied()
            .filter(|&i| !consumed[i]);

        let Some(i) = hit else {
            out.push(DiffRecord::platform_only(p));
            continue;
        };
        consumed[i] = true;
        let c = &channel[i];
        let classification = classify(p, Some(c))?;

        out.push(DiffRecord {
            payment_no: Some(p.payment_no.clone()),
            channel_trade_no: p.channel_trade_no.clone(),
            order_no: p.order_no.clone(),
            merchant_id: p.merchant_id,
            platform_amount: p.amount,
            channel_amount: c.amount,
            diff_amount: classification.diff_amount,
            currency: p.currency.clone(),
            platform_status: Some(p.status.clone()),
            channel_status: Some(c.status.clone()),
            is_resolved: classification.diff_type == DiffType::Matched,
            diff_type: classification.diff_type,
            diff_reason: classification.reason,
        });
    }

    for (c, used) in channel.iter().zip(consumed) {
        if !used {
            out.push(DiffRecord::channel_only(c)?);
        }
    }

    Ok(out)
}

/// Sum amounts, failing instead of wrapping.
pub fn checked_total(amounts: impl IntoIterator<Item = i64>) -> Result<i64> {
    amounts
        .into_iter()
        .try_fold(0i64, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| ReconciliationError::AmountOverflow("amount total exceeds i64".to_string()))
}

/// Task totals. Counts and amounts of the inputs, matched amount on the
/// platform side, and the signed net of every non-matched diff.
pub fn aggregate(
    platform: &[PlatformPayment],
    channel: &[ChannelPayment],
    records: &[DiffRecord],
) -> Result<TaskAggregates> {
    let (matched, diffs): (Vec<&DiffRecord>, Vec<&DiffRecord>) = records
        .iter()
        .partition(|r| r.diff_type == DiffType::Matched);

    Ok(TaskAggregates {
        platform_count: platform.len() as i64,
        platform_amount: checked_total(platform.iter().map(|p| p.amount))?,
        channel_count: channel.len() as i64,
        channel_amount: checked_total(channel.iter().map(|c| c.amount))?,
        matched_count: matched.len() as i64,
        matched_amount: checked_total(matched.iter().map(|r| r.platform_amount))?,
        diff_count: diffs.len() as i64,
        diff_amount: checked_total(diffs.iter().map(|r| r.diff_amount))?,
    })
}
