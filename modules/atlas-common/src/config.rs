use std::env;

/// Engine tuning knobs. Every threshold the reconciliation passes consult
/// lives here; `Default` carries the deployment defaults and `from_env`
/// lets operators override individual values without a config file.
#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// Hard spatial cutoff for matching a report to a point asset (meters).
    pub match_cutoff_m: f64,
    /// Wider cutoff for linear assets (roads, bridges).
    pub linear_match_cutoff_m: f64,
    /// Minimum score for an automatic report→asset link.
    pub auto_match_threshold: f64,

    /// Spatial cutoff for duplicate candidacy between reports (meters).
    /// Independent of the matcher's radius.
    pub duplicate_radius_m: f64,
    /// Maximum submission-time gap for duplicate candidacy (days).
    pub duplicate_window_days: i64,
    /// Minimum pairwise description similarity for duplicate candidacy.
    pub duplicate_similarity_threshold: f64,

    /// Rolling window for discrepancy aggregation (days).
    pub observation_window_days: i64,
    /// Recency decay horizon for discrepancy priority (days). Priority decays
    /// linearly from 1.0 at age zero toward the floor at this age.
    pub priority_decay_days: i64,

    /// Inactivity threshold after which a report or discrepancy is stale (days).
    pub staleness_days: i64,

    /// Geohash precision for spatial index cells. Precision 6 cells are
    /// ~1.2km × 0.6km, sized to the dominant (250m) query radius.
    pub geohash_precision: usize,
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            match_cutoff_m: 250.0,
            linear_match_cutoff_m: 1_000.0,
            auto_match_threshold: 0.75,
            duplicate_radius_m: 100.0,
            duplicate_window_days: 14,
            duplicate_similarity_threshold: 0.6,
            observation_window_days: 30,
            priority_decay_days: 30,
            staleness_days: 60,
            geohash_precision: 6,
        }
    }
}

impl ReconConfig {
    /// Defaults overridden by `ATLAS_*` environment variables where set.
    /// Panics with a clear message on unparseable values.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        override_f64("ATLAS_MATCH_CUTOFF_M", &mut cfg.match_cutoff_m);
        override_f64("ATLAS_LINEAR_MATCH_CUTOFF_M", &mut cfg.linear_match_cutoff_m);
        override_f64("ATLAS_AUTO_MATCH_THRESHOLD", &mut cfg.auto_match_threshold);
        override_f64("ATLAS_DUPLICATE_RADIUS_M", &mut cfg.duplicate_radius_m);
        override_i64("ATLAS_DUPLICATE_WINDOW_DAYS", &mut cfg.duplicate_window_days);
        override_f64(
            "ATLAS_DUPLICATE_SIMILARITY_THRESHOLD",
            &mut cfg.duplicate_similarity_threshold,
        );
        override_i64(
            "ATLAS_OBSERVATION_WINDOW_DAYS",
            &mut cfg.observation_window_days,
        );
        override_i64("ATLAS_PRIORITY_DECAY_DAYS", &mut cfg.priority_decay_days);
        override_i64("ATLAS_STALENESS_DAYS", &mut cfg.staleness_days);
        cfg
    }

    /// Match cutoff for the given asset kind.
    pub fn cutoff_for(&self, asset_type: crate::types::AssetType) -> f64 {
        if asset_type.is_linear() {
            self.linear_match_cutoff_m
        } else {
            self.match_cutoff_m
        }
    }
}

fn override_f64(key: &str, slot: &mut f64) {
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number, got {raw:?}"));
    }
}

fn override_i64(key: &str, slot: &mut i64) {
    if let Ok(raw) = env::var(key) {
        *slot = raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be an integer, got {raw:?}"));
    }
}
