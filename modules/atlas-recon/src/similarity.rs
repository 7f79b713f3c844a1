use std::collections::HashSet;

use atlas_common::config::ReconConfig;
use atlas_common::types::{haversine_m, InfrastructureAsset, Report};

/// Term weights for report→asset scoring. Type match is a hard filter,
/// never a weight. When the asset has no name the weights renormalize to
/// the spatial term alone, so unnamed assets stay auto-matchable.
const ASSET_SPATIAL_WEIGHT: f64 = 0.6;
const ASSET_NAME_WEIGHT: f64 = 0.4;

/// Monotonically decreasing spatial term: 1.0 at zero distance, 0.0 at and
/// beyond the hard cutoff.
pub fn spatial_term(distance_m: f64, cutoff_m: f64) -> f64 {
    if cutoff_m <= 0.0 {
        return 0.0;
    }
    (1.0 - distance_m / cutoff_m).clamp(0.0, 1.0)
}

/// Token-based Jaccard similarity over lowercased whitespace tokens.
/// Word overlap rather than substring matching, so "Ikeja Primary School"
/// and "school" don't collapse together.
pub fn token_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let a_tokens: HashSet<&str> = a_lower.split_whitespace().collect();
    let b_tokens: HashSet<&str> = b_lower.split_whitespace().collect();
    let intersection = a_tokens.intersection(&b_tokens).count();
    let union = a_tokens.union(&b_tokens).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Score a (report, candidate asset) pair in [0, 1].
///
/// Type mismatch forces 0 — type is a hard filter. Beyond the cutoff radius
/// the spatial term is 0 and with it the whole score, since the name term
/// alone can't place a report at an asset.
pub fn score_report_asset(report: &Report, asset: &InfrastructureAsset, cfg: &ReconConfig) -> f64 {
    if report.infrastructure_type != asset.asset_type {
        return 0.0;
    }
    let cutoff_m = cfg.cutoff_for(asset.asset_type);
    let spatial = spatial_term(haversine_m(report.location, asset.location), cutoff_m);
    if spatial == 0.0 {
        return 0.0;
    }

    match asset.name() {
        Some(name) if !report.description.trim().is_empty() => {
            let name_sim = token_similarity(&report.description, name);
            ASSET_SPATIAL_WEIGHT * spatial + ASSET_NAME_WEIGHT * name_sim
        }
        // Name term absent on either side: renormalize to spatial only.
        _ => spatial,
    }
}
