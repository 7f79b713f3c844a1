use chrono::{DateTime, Utc};

use atlas_common::config::ReconConfig;
use atlas_common::types::{AssetCondition, Discrepancy, InfrastructureAsset, Report, ReportedStatus};

/// Majority vote over reported statuses. Unknown votes are excluded; ties
/// break toward the more severe status. None when no countable votes exist.
pub fn consensus_status(statuses: &[ReportedStatus]) -> Option<ReportedStatus> {
    let mut counts: Vec<(ReportedStatus, u32)> = Vec::new();
    for status in statuses {
        if status.severity_rank().is_none() {
            continue;
        }
        match counts.iter_mut().find(|(s, _)| s == status) {
            Some((_, n)) => *n += 1,
            None => counts.push((*status, 1)),
        }
    }
    counts
        .into_iter()
        .max_by_key(|&(status, n)| (n, status.severity_rank()))
        .map(|(status, _)| status)
}

/// Normalized distance between official condition and citizen consensus on
/// the shared functional → non-functional ordinal scale. None when the
/// official condition has no position on that scale (under construction,
/// abandoned, unknown) — there is no baseline to diverge from.
pub fn severity_distance(official: AssetCondition, consensus: ReportedStatus) -> Option<f64> {
    let official_ord = official.ordinal()?;
    let consensus_ord = consensus.ordinal()?;
    // The scale spans 0..=2, so the maximum distance is 2.
    Some((official_ord as i8 - consensus_ord as i8).unsigned_abs() as f64 / 2.0)
}

/// Priority = severity × log-scaled support × recency decay of the most
/// recent corroborating report. Non-decreasing in support, non-increasing
/// in the age of the freshest report.
pub fn priority_score(
    severity: f64,
    support_count: u32,
    most_recent_age_days: f64,
    decay_days: i64,
) -> f64 {
    let support = (1.0 + support_count as f64).ln();
    let recency = if decay_days <= 0 {
        0.0
    } else {
        (1.0 - most_recent_age_days / decay_days as f64).clamp(0.0, 1.0)
    };
    severity * support * recency
}

/// Compare one asset's official condition against its windowed citizen
/// consensus. `reports` must already be the asset's non-duplicate reports
/// inside the observation window — the pipeline prefetches and filters.
/// Returns None when there is no discrepancy to record, which the caller
/// turns into a deletion of any prior row for the asset.
pub fn compute_for_asset(
    asset: &InfrastructureAsset,
    reports: &[&Report],
    now: DateTime<Utc>,
    cfg: &ReconConfig,
) -> Option<Discrepancy> {
    let statuses: Vec<_> = reports.iter().map(|r| r.reported_status).collect();
    let consensus = consensus_status(&statuses)?;
    let severity = severity_distance(asset.condition, consensus)?;
    if severity == 0.0 {
        return None;
    }

    let support_count = reports
        .iter()
        .filter(|r| r.reported_status.severity_rank().is_some())
        .count() as u32;
    let most_recent = reports
        .iter()
        .map(|r| r.reported_at)
        .max()
        .unwrap_or(now);
    let age_days = (now - most_recent).num_hours().max(0) as f64 / 24.0;

    Some(Discrepancy {
        asset_id: asset.id,
        official_condition: asset.condition,
        consensus_status: consensus,
        severity,
        support_count,
        priority: priority_score(severity, support_count, age_days, cfg.priority_decay_days),
        computed_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    use atlas_common::types::{AssetType, GeoPoint, ReportState, ReporterType};

    fn asset_with(condition: AssetCondition) -> InfrastructureAsset {
        InfrastructureAsset {
            id: Uuid::new_v4(),
            asset_type: AssetType::WaterPoint,
            official_name: Some("Agege Borehole".to_string()),
            local_name: None,
            description: String::new(),
            location: GeoPoint { lat: 6.4550, lng: 3.3841 },
            area_id: Uuid::new_v4(),
            condition,
            condition_verified_at: Some(Utc::now() - Duration::days(90)),
            official_id: None,
            verified: true,
            active: true,
        }
    }

    fn report_with(status: ReportedStatus, days_ago: i64) -> Report {
        let at = Utc::now() - Duration::days(days_ago);
        Report {
            id: Uuid::new_v4(),
            asset_id: None,
            infrastructure_type: AssetType::WaterPoint,
            reported_status: status,
            description: "no water".to_string(),
            location: GeoPoint { lat: 6.4550, lng: 3.3841 },
            location_accuracy_m: None,
            reporter_type: ReporterType::Citizen,
            reporter_id: None,
            is_anonymous: true,
            low_confidence: false,
            state: ReportState::Submitted,
            rejection_reason: None,
            reported_at: at,
            last_activity_at: at,
            version: 0,
        }
    }

    #[test]
    fn majority_wins() {
        let consensus = consensus_status(&[
            ReportedStatus::Broken,
            ReportedStatus::Broken,
            ReportedStatus::Working,
        ]);
        assert_eq!(consensus, Some(ReportedStatus::Broken));
    }

    #[test]
    fn tie_breaks_toward_more_severe() {
        let consensus = consensus_status(&[
            ReportedStatus::Working,
            ReportedStatus::Inaccessible,
        ]);
        assert_eq!(consensus, Some(ReportedStatus::Inaccessible));
    }

    #[test]
    fn unknown_votes_are_excluded() {
        let consensus = consensus_status(&[
            ReportedStatus::Unknown,
            ReportedStatus::Unknown,
            ReportedStatus::Working,
        ]);
        assert_eq!(consensus, Some(ReportedStatus::Working));
        assert_eq!(consensus_status(&[ReportedStatus::Unknown]), None);
        assert_eq!(consensus_status(&[]), None);
    }

    #[test]
    fn functional_vs_broken_is_max_distance() {
        let d = severity_distance(AssetCondition::Functional, ReportedStatus::Broken);
        assert_eq!(d, Some(1.0));
        let d = severity_distance(AssetCondition::Functional, ReportedStatus::PartiallyWorking);
        assert_eq!(d, Some(0.5));
        let d = severity_distance(AssetCondition::NonFunctional, ReportedStatus::Broken);
        assert_eq!(d, Some(0.0));
    }

    #[test]
    fn no_baseline_no_distance() {
        assert_eq!(
            severity_distance(AssetCondition::UnderConstruction, ReportedStatus::Broken),
            None
        );
        assert_eq!(
            severity_distance(AssetCondition::Unknown, ReportedStatus::Broken),
            None
        );
    }

    #[test]
    fn priority_non_decreasing_in_support() {
        let p3 = priority_score(1.0, 3, 1.0, 30);
        let p5 = priority_score(1.0, 5, 1.0, 30);
        let p10 = priority_score(1.0, 10, 1.0, 30);
        assert!(p5 > p3);
        assert!(p10 > p5);
    }

    #[test]
    fn priority_non_increasing_in_age() {
        let fresh = priority_score(1.0, 3, 0.0, 30);
        let mid = priority_score(1.0, 3, 15.0, 30);
        let old = priority_score(1.0, 3, 30.0, 30);
        assert!(fresh > mid);
        assert!(mid > old);
        assert_eq!(old, 0.0);
    }

    #[test]
    fn functional_asset_with_broken_consensus_emits_discrepancy() {
        // Official functional, reports broken/broken/inaccessible
        let cfg = ReconConfig::default();
        let asset = asset_with(AssetCondition::Functional);
        let reports = [
            report_with(ReportedStatus::Broken, 5),
            report_with(ReportedStatus::Broken, 3),
            report_with(ReportedStatus::Inaccessible, 1),
        ];
        let refs: Vec<&Report> = reports.iter().collect();
        let d = compute_for_asset(&asset, &refs, Utc::now(), &cfg).expect("discrepancy");

        assert_eq!(d.consensus_status, ReportedStatus::Broken);
        assert!(d.severity > 0.0);
        assert_eq!(d.support_count, 3);
        assert!(d.priority > 0.0);
    }

    #[test]
    fn agreeing_consensus_emits_nothing() {
        let cfg = ReconConfig::default();
        let asset = asset_with(AssetCondition::NonFunctional);
        let reports = [
            report_with(ReportedStatus::Broken, 2),
            report_with(ReportedStatus::Broken, 1),
        ];
        let refs: Vec<&Report> = reports.iter().collect();
        assert!(compute_for_asset(&asset, &refs, Utc::now(), &cfg).is_none());
    }

    #[test]
    fn unknown_only_window_emits_nothing() {
        let cfg = ReconConfig::default();
        let asset = asset_with(AssetCondition::Functional);
        let reports = [report_with(ReportedStatus::Unknown, 1)];
        let refs: Vec<&Report> = reports.iter().collect();
        assert!(compute_for_asset(&asset, &refs, Utc::now(), &cfg).is_none());
    }
}
