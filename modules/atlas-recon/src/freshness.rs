use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use atlas_common::config::ReconConfig;
use atlas_common::types::{Discrepancy, DuplicateCluster, Report, Verification};

/// Staleness is derived, never stored: a pure function of last activity and
/// the current time, so dashboards can't drift out of sync with reality.
pub fn is_stale(last_activity: DateTime<Utc>, now: DateTime<Utc>, threshold_days: i64) -> bool {
    now - last_activity > Duration::days(threshold_days)
}

/// The moment a report was last touched: its own activity timestamp, or a
/// later confirmed verification. Unconfirmed verifications don't reset the
/// clock — a failed site visit is not re-verification.
pub fn effective_last_activity(
    report: &Report,
    verifications: &[Verification],
) -> DateTime<Utc> {
    verifications
        .iter()
        .filter(|v| v.report_id == report.id && v.is_confirmed)
        .map(|v| v.verified_at)
        .max()
        .map_or(report.last_activity_at, |v| v.max(report.last_activity_at))
}

/// Result of one staleness sweep, re-derived for dashboards.
#[derive(Debug, Default, Serialize)]
pub struct StalenessSweep {
    pub stale_report_ids: Vec<Uuid>,
    pub stale_discrepancy_assets: Vec<Uuid>,
}

/// Re-derive staleness across reports and discrepancies.
///
/// A fresh duplicate corroborates every report in its cluster, so activity
/// is pooled per cluster before the threshold check: a 90-day-old canonical
/// report with a 5-day-old duplicate is not stale.
pub fn sweep(
    reports: &[Report],
    verifications: &[Verification],
    clusters: &[DuplicateCluster],
    discrepancies: &[Discrepancy],
    now: DateTime<Utc>,
    cfg: &ReconConfig,
) -> StalenessSweep {
    let own: HashMap<Uuid, DateTime<Utc>> = reports
        .iter()
        .map(|r| (r.id, effective_last_activity(r, verifications)))
        .collect();
    let mut pooled: HashMap<Uuid, DateTime<Utc>> = HashMap::new();
    for cluster in clusters {
        let latest = cluster
            .member_ids
            .iter()
            .filter_map(|id| own.get(id))
            .max()
            .copied();
        if let Some(latest) = latest {
            for id in &cluster.member_ids {
                pooled.insert(*id, latest);
            }
        }
    }

    let mut out = StalenessSweep::default();
    for report in reports {
        let last = pooled.get(&report.id).copied().unwrap_or(own[&report.id]);
        if is_stale(last, now, cfg.staleness_days) {
            out.stale_report_ids.push(report.id);
        }
    }
    for d in discrepancies {
        if is_stale(d.computed_at, now, cfg.staleness_days) {
            out.stale_discrepancy_assets.push(d.asset_id);
        }
    }
    out.stale_report_ids.sort();
    out.stale_discrepancy_assets.sort();
    out
}
