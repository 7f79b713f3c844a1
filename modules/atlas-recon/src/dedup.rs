use std::collections::{HashMap, HashSet};

use tracing::warn;
use uuid::Uuid;

use atlas_common::config::ReconConfig;
use atlas_common::types::{haversine_m, ClusterPin, DuplicateCluster, Report, ReportState};

use crate::similarity::token_similarity;
use crate::spatial::{Namespace, SpatialIndex};

/// Result of one clustering pass over a partition's reports.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Connected components with >= 2 members, ordered by canonical id.
    pub clusters: Vec<DuplicateCluster>,
    /// Contradicting pin pairs, flagged for moderator resolution.
    pub pin_conflicts: Vec<(Uuid, Uuid)>,
    /// Reports the pass left unclustered because pins contradicted.
    pub unclustered: Vec<Uuid>,
}

/// Union-find over report indices. Path compression, union by rank.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            self.parent[i] = self.find(self.parent[i]);
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Two reports are duplicate candidates when all four predicates hold:
/// same inferred type, within the duplicate radius, submitted within the
/// duplicate window, and description similarity at or above threshold.
pub fn is_duplicate_pair(a: &Report, b: &Report, cfg: &ReconConfig) -> bool {
    a.infrastructure_type == b.infrastructure_type
        && haversine_m(a.location, b.location) <= cfg.duplicate_radius_m
        && (a.reported_at - b.reported_at).num_days().abs() <= cfg.duplicate_window_days
        && token_similarity(&a.description, &b.description) >= cfg.duplicate_similarity_threshold
}

/// Cluster a partition's reports into duplicate groups.
///
/// Edges satisfying `is_duplicate_pair` form an undirected graph; connected
/// components become clusters. Moderator pins are a constraint set applied
/// around the automatic graph: ForceMerge edges are always present,
/// ForceSeparate pairs always absent — even when the predicate disagrees.
/// A merge that would transitively join a separated pair is a pin conflict;
/// the affected reports are left unclustered rather than guessed at.
///
/// Resolved reports are frozen and never re-clustered. `existing` clusters
/// let the pass keep stable cluster ids across runs: a new component that
/// contains a prior cluster's canonical report inherits its id.
pub fn cluster_reports(
    reports: &[Report],
    pins: &[ClusterPin],
    existing: &[DuplicateCluster],
    cfg: &ReconConfig,
) -> DedupOutcome {
    // Deterministic processing order: submission time, then id.
    let mut active: Vec<&Report> = reports
        .iter()
        .filter(|r| r.state != ReportState::Resolved)
        .collect();
    active.sort_by(|a, b| a.reported_at.cmp(&b.reported_at).then_with(|| a.id.cmp(&b.id)));

    let index_of: HashMap<Uuid, usize> = active
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id, i))
        .collect();

    let ordered_pair = |a: Uuid, b: Uuid| if a <= b { (a, b) } else { (b, a) };

    let mut must: Vec<(Uuid, Uuid)> = Vec::new();
    let mut cannot: HashSet<(Uuid, Uuid)> = HashSet::new();
    for pin in pins {
        let (a, b) = pin.pair();
        if !index_of.contains_key(&a) || !index_of.contains_key(&b) || a == b {
            continue;
        }
        match pin {
            ClusterPin::ForceMerge { .. } => must.push(ordered_pair(a, b)),
            ClusterPin::ForceSeparate { .. } => {
                cannot.insert(ordered_pair(a, b));
            }
        }
    }
    must.sort();
    must.dedup();

    let mut outcome = DedupOutcome::default();
    let mut conflicted: HashSet<Uuid> = HashSet::new();

    // Direct contradiction: the same pair pinned both ways.
    must.retain(|pair| {
        if cannot.contains(pair) {
            warn!(a = %pair.0, b = %pair.1, "contradicting cluster pins, leaving pair unclustered");
            outcome.pin_conflicts.push(*pair);
            conflicted.insert(pair.0);
            conflicted.insert(pair.1);
            false
        } else {
            true
        }
    });

    let mut uf = UnionFind::new(active.len());

    // Returns the separated pair a union of `i` and `j` would transitively
    // join, if any. Pins are few; a scan per union is fine.
    let violates = |uf: &mut UnionFind, i: usize, j: usize| -> Option<(Uuid, Uuid)> {
        let (ri, rj) = (uf.find(i), uf.find(j));
        if ri == rj {
            return None;
        }
        for &(x, y) in &cannot {
            let (rx, ry) = (uf.find(index_of[&x]), uf.find(index_of[&y]));
            if (rx == ri && ry == rj) || (rx == rj && ry == ri) {
                return Some((x, y));
            }
        }
        None
    };

    // Pinned merges first, so moderator intent shapes the components before
    // automatic edges fill in.
    for &(a, b) in &must {
        let (i, j) = (index_of[&a], index_of[&b]);
        if let Some(pair) = violates(&mut uf, i, j) {
            warn!(a = %a, b = %b, "merge pin contradicts a separation pin");
            outcome.pin_conflicts.push(pair);
            conflicted.insert(a);
            conflicted.insert(b);
            conflicted.insert(pair.0);
            conflicted.insert(pair.1);
            continue;
        }
        uf.union(i, j);
    }

    // Automatic edges. A grid over the active reports narrows each
    // candidate search to the duplicate radius; the predicate still
    // decides, the grid only prunes pairs that cannot satisfy it.
    let mut grid = SpatialIndex::new(cfg.geohash_precision);
    for r in &active {
        grid.insert(Namespace::Reports, r.id, r.location);
    }
    for i in 0..active.len() {
        for neighbor in grid.query_radius(Namespace::Reports, active[i].location, cfg.duplicate_radius_m) {
            let j = index_of[&neighbor.id];
            if j <= i {
                continue;
            }
            if !is_duplicate_pair(active[i], active[j], cfg) {
                continue;
            }
            if cannot.contains(&ordered_pair(active[i].id, neighbor.id)) {
                continue;
            }
            if violates(&mut uf, i, j).is_some() {
                // The predicate would merge a separated pair transitively;
                // the exclusion wins and the edge is dropped.
                continue;
            }
            uf.union(i, j);
        }
    }

    // Gather components, dropping conflicted reports from membership.
    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..active.len() {
        if conflicted.contains(&active[i].id) {
            continue;
        }
        let root = uf.find(i);
        components.entry(root).or_default().push(i);
    }

    let mut clusters: Vec<DuplicateCluster> = Vec::new();
    for (_, mut members) in components {
        if members.len() < 2 {
            continue;
        }
        members.sort(); // index order is (reported_at, id) order
        let member_ids: Vec<Uuid> = members.iter().map(|&i| active[i].id).collect();
        let canonical_id = member_ids[0];
        let id = existing
            .iter()
            .find(|c| member_ids.contains(&c.canonical_id))
            .map(|c| c.id)
            .unwrap_or_else(Uuid::new_v4);
        clusters.push(DuplicateCluster {
            id,
            member_ids,
            canonical_id,
        });
    }
    clusters.sort_by_key(|c| c.canonical_id);

    outcome.pin_conflicts.sort();
    outcome.pin_conflicts.dedup();
    outcome.unclustered = {
        let mut ids: Vec<Uuid> = conflicted.into_iter().collect();
        ids.sort();
        ids
    };
    outcome.clusters = clusters;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use atlas_common::types::{AssetType, GeoPoint, ReportedStatus, ReporterType};

    fn report(lat: f64, lng: f64, days_ago: i64, description: &str) -> Report {
        let reported_at = Utc::now() - Duration::days(days_ago);
        Report {
            id: Uuid::new_v4(),
            asset_id: None,
            infrastructure_type: AssetType::WaterPoint,
            reported_status: ReportedStatus::Broken,
            description: description.to_string(),
            location: GeoPoint { lat, lng },
            location_accuracy_m: None,
            reporter_type: ReporterType::Citizen,
            reporter_id: Some(Uuid::new_v4()),
            is_anonymous: false,
            low_confidence: false,
            state: ReportState::Submitted,
            rejection_reason: None,
            reported_at,
            last_activity_at: reported_at,
            version: 0,
        }
    }

    #[test]
    fn forty_meters_two_days_apart_clusters_with_earlier_canonical() {
        let cfg = ReconConfig::default();
        let earlier = report(6.45500, 3.3841, 3, "borehole pump handle snapped off");
        // ~40m north
        let later = report(6.45536, 3.3841, 1, "pump handle snapped at borehole");
        let out = cluster_reports(&[later.clone(), earlier.clone()], &[], &[], &cfg);

        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].canonical_id, earlier.id);
        assert!(out.clusters[0].is_duplicate(later.id));
    }

    #[test]
    fn pair_near_the_radius_boundary_still_clusters() {
        let cfg = ReconConfig::default();
        // ~99m apart, just inside the 100m duplicate radius.
        let a = report(6.45500, 3.3841, 1, "borehole pump handle snapped off");
        let b = report(6.45589, 3.3841, 1, "borehole pump handle snapped off");
        let out = cluster_reports(&[a, b], &[], &[], &cfg);
        assert_eq!(out.clusters.len(), 1);
    }

    #[test]
    fn distant_identical_reports_never_cluster() {
        let cfg = ReconConfig::default();
        // Same text, ~2km apart: well outside the duplicate radius.
        let a = report(6.4550, 3.3841, 1, "borehole pump handle snapped off");
        let b = report(6.4730, 3.3841, 1, "borehole pump handle snapped off");
        let out = cluster_reports(&[a, b], &[], &[], &cfg);
        assert!(out.clusters.is_empty());
    }

    #[test]
    fn clustering_is_transitive() {
        let cfg = ReconConfig::default();
        // A~B and B~C within radius; A and C are ~160m apart (beyond 100m)
        let a = report(6.45500, 3.3841, 2, "water point pump broken");
        let b = report(6.45572, 3.3841, 1, "water point pump broken");
        let c = report(6.45644, 3.3841, 0, "water point pump broken");
        let out = cluster_reports(&[a.clone(), b.clone(), c.clone()], &[], &[], &cfg);

        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].member_ids.len(), 3);
        assert_eq!(out.clusters[0].canonical_id, a.id);
    }

    #[test]
    fn different_types_never_cluster() {
        let cfg = ReconConfig::default();
        let a = report(6.4550, 3.3841, 1, "broken infrastructure here");
        let mut b = report(6.4550, 3.3841, 1, "broken infrastructure here");
        b.infrastructure_type = AssetType::School;
        let out = cluster_reports(&[a, b], &[], &[], &cfg);
        assert!(out.clusters.is_empty());
    }

    #[test]
    fn dissimilar_descriptions_never_cluster() {
        let cfg = ReconConfig::default();
        let a = report(6.4550, 3.3841, 1, "pump handle snapped off completely");
        let b = report(6.4550, 3.3841, 1, "water tastes strange and smells bad");
        let out = cluster_reports(&[a, b], &[], &[], &cfg);
        assert!(out.clusters.is_empty());
    }

    #[test]
    fn pinned_exclusion_beats_predicate() {
        let cfg = ReconConfig::default();
        let a = report(6.4550, 3.3841, 1, "pump broken at the market square");
        let b = report(6.4550, 3.3841, 1, "pump broken at the market square");
        let pins = [ClusterPin::ForceSeparate { a: a.id, b: b.id }];
        let out = cluster_reports(&[a, b], &pins, &[], &cfg);
        assert!(out.clusters.is_empty());
        assert!(out.pin_conflicts.is_empty());
    }

    #[test]
    fn pinned_exclusion_blocks_transitive_merge() {
        let cfg = ReconConfig::default();
        let a = report(6.45500, 3.3841, 2, "water point pump broken");
        let b = report(6.45572, 3.3841, 1, "water point pump broken");
        let c = report(6.45644, 3.3841, 0, "water point pump broken");
        let pins = [ClusterPin::ForceSeparate { a: a.id, b: c.id }];
        let out = cluster_reports(&[a.clone(), b.clone(), c.clone()], &pins, &[], &cfg);

        // a and c must end in different clusters; b joins exactly one.
        for cluster in &out.clusters {
            assert!(
                !(cluster.member_ids.contains(&a.id) && cluster.member_ids.contains(&c.id)),
                "separated pair ended up in one cluster"
            );
        }
    }

    #[test]
    fn force_merge_overrides_predicate() {
        let cfg = ReconConfig::default();
        // Far apart and textually unrelated: predicate says no.
        let a = report(6.4550, 3.3841, 1, "pump broken");
        let b = report(6.4750, 3.3841, 1, "no water flowing today");
        let pins = [ClusterPin::ForceMerge { a: a.id, b: b.id }];
        let out = cluster_reports(&[a.clone(), b.clone()], &pins, &[], &cfg);

        assert_eq!(out.clusters.len(), 1);
        assert_eq!(out.clusters[0].member_ids.len(), 2);
    }

    #[test]
    fn contradicting_pins_leave_pair_unclustered() {
        let cfg = ReconConfig::default();
        let a = report(6.4550, 3.3841, 1, "pump broken at the square");
        let b = report(6.4550, 3.3841, 1, "pump broken at the square");
        let pins = [
            ClusterPin::ForceMerge { a: a.id, b: b.id },
            ClusterPin::ForceSeparate { a: a.id, b: b.id },
        ];
        let out = cluster_reports(&[a.clone(), b.clone()], &pins, &[], &cfg);

        assert!(out.clusters.is_empty());
        assert_eq!(out.pin_conflicts.len(), 1);
        assert_eq!(out.unclustered.len(), 2);
    }

    #[test]
    fn resolved_reports_are_frozen() {
        let cfg = ReconConfig::default();
        let a = report(6.4550, 3.3841, 1, "pump broken at the square");
        let mut b = report(6.4550, 3.3841, 1, "pump broken at the square");
        b.state = ReportState::Resolved;
        let out = cluster_reports(&[a, b], &[], &[], &cfg);
        assert!(out.clusters.is_empty());
    }

    #[test]
    fn recluster_keeps_stable_cluster_id() {
        let cfg = ReconConfig::default();
        let a = report(6.4550, 3.3841, 2, "pump broken at the square");
        let b = report(6.4550, 3.3841, 1, "pump broken at the square");
        let first = cluster_reports(&[a.clone(), b.clone()], &[], &[], &cfg);
        assert_eq!(first.clusters.len(), 1);

        let c = report(6.4550, 3.3841, 0, "pump broken at the square");
        let second = cluster_reports(&[a, b, c], &[], &first.clusters, &cfg);
        assert_eq!(second.clusters.len(), 1);
        assert_eq!(second.clusters[0].id, first.clusters[0].id);
        assert_eq!(second.clusters[0].member_ids.len(), 3);
    }
}
