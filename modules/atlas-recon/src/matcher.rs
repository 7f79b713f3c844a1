use chrono::{DateTime, Utc};

use atlas_common::config::ReconConfig;
use atlas_common::types::{InfrastructureAsset, MatchOutcome, MatchResult, Report};

use crate::similarity::score_report_asset;

/// A candidate asset with its distance to the report, as produced by the
/// spatial index query.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub asset: InfrastructureAsset,
    pub distance_m: f64,
}

/// Link one report against its spatial candidates.
///
/// Pure: candidates come from a bounded prefetch (spatial index query within
/// the type's cutoff radius); no I/O happens here. Policy:
/// - best score >= auto-match threshold → `AutoMatched`, link committed
/// - 0 < best score < threshold → `Ambiguous`, best candidate retained as a
///   suggestion only
/// - no candidate scores above zero → `Unmatched`
///
/// Ties at the maximum score break by smaller distance, then freshest
/// condition verification, then lexical id — reproducible across runs.
///
/// Idempotent re-match: when the report already links an asset that still
/// scores at or above the threshold, that link is preserved even if another
/// candidate now scores equally.
pub fn match_report(
    report: &Report,
    candidates: &[Candidate],
    cfg: &ReconConfig,
    now: DateTime<Utc>,
) -> MatchResult {
    let mut scored: Vec<(&Candidate, f64)> = candidates
        .iter()
        .map(|c| (c, score_report_asset(report, &c.asset, cfg)))
        .filter(|(_, score)| *score > 0.0)
        .collect();

    // Existing link still above threshold: keep it rather than recompute to
    // a different equally-scoring candidate.
    if let Some(linked) = report.asset_id {
        if let Some(&(_, score)) = scored.iter().find(|(c, _)| c.asset.id == linked) {
            if score >= cfg.auto_match_threshold {
                return MatchResult {
                    report_id: report.id,
                    asset_id: Some(linked),
                    score,
                    outcome: MatchOutcome::AutoMatched,
                    computed_at: now,
                };
            }
        }
    }

    scored.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa)
            .then_with(|| a.distance_m.total_cmp(&b.distance_m))
            .then_with(|| {
                // Prefer the freshest-verified asset; unverified sorts last.
                b.asset
                    .condition_verified_at
                    .cmp(&a.asset.condition_verified_at)
            })
            .then_with(|| a.asset.id.cmp(&b.asset.id))
    });

    match scored.first() {
        None => MatchResult {
            report_id: report.id,
            asset_id: None,
            score: 0.0,
            outcome: MatchOutcome::Unmatched,
            computed_at: now,
        },
        Some(&(best, score)) if score >= cfg.auto_match_threshold => MatchResult {
            report_id: report.id,
            asset_id: Some(best.asset.id),
            score,
            outcome: MatchOutcome::AutoMatched,
            computed_at: now,
        },
        Some(&(best, score)) => MatchResult {
            report_id: report.id,
            asset_id: Some(best.asset.id),
            score,
            outcome: MatchOutcome::Ambiguous,
            computed_at: now,
        },
    }
}
