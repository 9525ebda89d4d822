//! View selectors: pure projections of store state and raw server payloads
//! into card and chart rows. Malformed input yields an empty result.

use crate::channel::ChannelError;
use crate::store::{ConnectionView, TrainingSnapshot};
use legal_ai_contracts::{DownloadProgressPayload, MetricsPoint};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiStat {
    pub key: &'static str,
    pub label: &'static str,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarPoint {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinePoint {
    pub epoch: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConnectionBadge {
    Connected,
    Reconnecting { attempt: u32 },
    /// Terminal until the user reconnects.
    Disconnected,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadRow {
    pub id: String,
    pub percent: f64,
    pub done: bool,
}

const KPI_FIELDS: [(&str, &str); 5] = [
    ("totalModels", "کل مدل‌ها"),
    ("activeTrainings", "آموزش‌های فعال"),
    ("completedTrainings", "آموزش‌های تکمیل‌شده"),
    ("totalDatasets", "مجموعه‌داده‌ها"),
    ("averageAccuracy", "میانگین دقت"),
];

/// Known numeric fields of a stats object, in a fixed order. Missing or
/// non-numeric fields are skipped.
pub fn to_kpi_stats(stats: Option<&Value>) -> Vec<KpiStat> {
    let Some(obj) = stats.and_then(Value::as_object) else {
        return Vec::new();
    };
    KPI_FIELDS
        .iter()
        .filter_map(|&(key, label)| {
            let value = obj.get(key)?.as_f64()?;
            Some(KpiStat { key, label, value })
        })
        .collect()
}

/// Counts entries by their `status` field, in order of first appearance.
pub fn to_bar_series(entries: Option<&Value>) -> Vec<BarPoint> {
    let Some(items) = entries.and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut series: Vec<BarPoint> = Vec::new();
    for item in items {
        let name = item
            .get("status")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("unknown");
        match series.iter_mut().find(|p| p.name == name) {
            Some(point) => point.count += 1,
            None => series.push(BarPoint { name: name.to_string(), count: 1 }),
        }
    }
    series
}

/// Accepts a bare array of points or an object carrying it under `history`
/// or `metrics`. Points without a numeric epoch, loss and accuracy are skipped.
pub fn to_line_series(input: Option<&Value>) -> Vec<LinePoint> {
    let points = match input {
        Some(Value::Array(items)) => items,
        Some(Value::Object(obj)) => match obj.get("history").or_else(|| obj.get("metrics")) {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    points.iter().filter_map(line_point).collect()
}

fn line_point(v: &Value) -> Option<LinePoint> {
    let epoch = u32::try_from(v.get("epoch")?.as_u64()?).ok()?;
    Some(LinePoint {
        epoch,
        loss: v.get("loss")?.as_f64()?,
        accuracy: v.get("accuracy")?.as_f64()?,
        val_loss: v.get("valLoss").and_then(Value::as_f64),
        val_accuracy: v.get("valAccuracy").and_then(Value::as_f64),
    })
}

pub fn history_to_line_series(history: &[MetricsPoint]) -> Vec<LinePoint> {
    history
        .iter()
        .map(|p| LinePoint {
            epoch: p.epoch,
            loss: p.loss,
            accuracy: p.accuracy,
            val_loss: p.val_loss,
            val_accuracy: p.val_accuracy,
        })
        .collect()
}

pub fn snapshot_to_cards(snapshot: Option<&TrainingSnapshot>) -> Vec<KpiStat> {
    let Some(s) = snapshot else {
        return Vec::new();
    };
    vec![
        KpiStat { key: "progress", label: "پیشرفت", value: s.progress },
        KpiStat { key: "epoch", label: "دوره", value: f64::from(s.epoch) },
        KpiStat { key: "loss", label: "خطا", value: s.loss },
        KpiStat { key: "accuracy", label: "دقت", value: s.accuracy * 100.0 },
    ]
}

pub fn connection_badge(conn: &ConnectionView) -> ConnectionBadge {
    if conn.connected {
        return ConnectionBadge::Connected;
    }
    match &conn.error {
        Some(ChannelError::Offline) => ConnectionBadge::Offline,
        Some(ChannelError::ExhaustedRetries { .. }) => ConnectionBadge::Disconnected,
        _ if conn.reconnect_attempt > 0 => ConnectionBadge::Reconnecting { attempt: conn.reconnect_attempt },
        _ => ConnectionBadge::Disconnected,
    }
}

pub fn downloads_to_rows(downloads: &[DownloadProgressPayload]) -> Vec<DownloadRow> {
    downloads
        .iter()
        .map(|d| {
            let percent = if d.total == 0 {
                0.0
            } else {
                (100.0 * d.downloaded as f64 / d.total as f64).min(100.0)
            };
            DownloadRow {
                id: d.id.clone(),
                percent,
                done: d.total > 0 && d.downloaded >= d.total,
            }
        })
        .collect()
}
