//! Pass orchestration. Each pass prefetches one partition's working set,
//! runs the pure scoring/clustering code, and writes derived rows back by
//! key. Passes are idempotent, so a crashed run is re-run, not repaired.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use atlas_common::config::ReconConfig;
use atlas_common::error::AtlasError;
use atlas_common::types::{InfrastructureAsset, MatchOutcome, MatchResult, Report, ReportState};

use crate::dedup::cluster_reports;
use crate::discrepancy::compute_for_asset;
use crate::freshness::{sweep, StalenessSweep};
use crate::lifecycle::{transition, TransitionOk};
use crate::matcher::{match_report, Candidate};
use crate::partition::PartitionMap;
use crate::spatial::{Namespace, SpatialIndex};
use crate::store::ReconStore;

/// Cooperative cancellation for long batch runs. Checked between
/// partitions and between passes, never mid-record.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct MatchStats {
    pub scanned: usize,
    pub auto_matched: usize,
    pub ambiguous: usize,
    pub unmatched: usize,
    pub errors: usize,
}

impl std::fmt::Display for MatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned, {} auto-matched, {} ambiguous, {} unmatched, {} errors",
            self.scanned, self.auto_matched, self.ambiguous, self.unmatched, self.errors
        )
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DedupStats {
    pub scanned: usize,
    pub clusters: usize,
    pub duplicates: usize,
    pub pin_conflicts: usize,
}

impl std::fmt::Display for DedupStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scanned, {} clusters, {} duplicates, {} pin conflicts",
            self.scanned, self.clusters, self.duplicates, self.pin_conflicts
        )
    }
}

#[derive(Debug, Default, Serialize)]
pub struct DiscrepancyStats {
    pub assets_evaluated: usize,
    pub recorded: usize,
    pub cleared: usize,
}

impl std::fmt::Display for DiscrepancyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} assets evaluated, {} discrepancies recorded, {} cleared",
            self.assets_evaluated, self.recorded, self.cleared
        )
    }
}

/// One partition's full reconciliation run.
#[derive(Debug, Default, Serialize)]
pub struct PartitionStats {
    pub matching: MatchStats,
    pub dedup: DedupStats,
    pub discrepancy: DiscrepancyStats,
}

/// A partition's assets, spatially indexed once per pass.
struct IndexedAssets {
    index: SpatialIndex,
    by_id: HashMap<Uuid, InfrastructureAsset>,
}

/// The reconciliation engine over a storage backend.
pub struct Reconciler<S: ReconStore> {
    store: S,
    cfg: ReconConfig,
}

impl<S: ReconStore> Reconciler<S> {
    pub fn new(store: S, cfg: ReconConfig) -> Self {
        Self { store, cfg }
    }

    /// Partition ownership derived from the current area tree.
    pub async fn partitions(&self) -> Result<PartitionMap> {
        let areas = self.store.areas().await?;
        Ok(PartitionMap::new(areas, self.cfg.geohash_precision))
    }

    /// Match a single report against active assets in its partition.
    ///
    /// Terminal reports (resolved, rejected) are frozen: the stored result
    /// is returned when one exists, otherwise a result reflecting the
    /// report's current link — never a rescore, and nothing is written.
    /// For everything else the result is upserted; an auto-match commits
    /// the link and an unmatched outcome clears it, while an ambiguous
    /// suggestion leaves the link alone.
    pub async fn match_report(&self, report_id: Uuid) -> Result<MatchResult> {
        let report = self
            .store
            .report(report_id)
            .await?
            .ok_or_else(|| AtlasError::Validation(format!("unknown report {report_id}")))?;

        if report.state.is_terminal() {
            if let Some(existing) = self.store.match_result(report_id).await? {
                return Ok(existing);
            }
            let outcome = if report.asset_id.is_some() {
                MatchOutcome::AutoMatched
            } else {
                MatchOutcome::Unmatched
            };
            return Ok(MatchResult {
                report_id,
                asset_id: report.asset_id,
                score: 0.0,
                outcome,
                computed_at: Utc::now(),
            });
        }

        let partitions = self.partitions().await?;
        let linked_area = match report.asset_id {
            Some(id) => self.store.asset(id).await?.map(|a| a.area_id),
            None => None,
        };
        let partition = partitions
            .partition_for_report(&report, linked_area)
            .ok_or_else(|| {
                AtlasError::Validation(format!("report {report_id} maps to no partition"))
            })?;

        let assets = self
            .index_assets(self.store.assets_in_partition(partition).await?);
        let result = self.match_against(&report, &assets, Utc::now());
        self.commit_match(&report, &result).await?;
        Ok(result)
    }

    /// Index a partition's assets once; every report in the pass queries
    /// the same grid instead of rebuilding it.
    fn index_assets(&self, assets: Vec<InfrastructureAsset>) -> IndexedAssets {
        let mut index = SpatialIndex::new(self.cfg.geohash_precision);
        let mut by_id = HashMap::with_capacity(assets.len());
        for asset in assets {
            index.insert(Namespace::Assets, asset.id, asset.location);
            by_id.insert(asset.id, asset);
        }
        IndexedAssets { index, by_id }
    }

    fn match_against(
        &self,
        report: &Report,
        assets: &IndexedAssets,
        now: DateTime<Utc>,
    ) -> MatchResult {
        let cutoff = self.cfg.cutoff_for(report.infrastructure_type);
        let candidates: Vec<Candidate> = assets
            .index
            .query_radius(Namespace::Assets, report.location, cutoff)
            .into_iter()
            .filter_map(|n| {
                assets.by_id.get(&n.id).map(|a| Candidate {
                    asset: a.clone(),
                    distance_m: n.distance_m,
                })
            })
            .collect();
        match_report(report, &candidates, &self.cfg, now)
    }

    async fn commit_match(&self, report: &Report, result: &MatchResult) -> Result<()> {
        self.store.upsert_match_result(result).await?;
        match result.outcome {
            MatchOutcome::AutoMatched => {
                if report.asset_id != result.asset_id {
                    self.store.link_report(report.id, result.asset_id).await?;
                }
            }
            MatchOutcome::Unmatched => {
                if report.asset_id.is_some() {
                    self.store.link_report(report.id, None).await?;
                }
            }
            MatchOutcome::Ambiguous => {}
        }
        Ok(())
    }

    /// Batch-match every report in a partition submitted since the last
    /// run. The fetch is inclusive of the watermark timestamp, so a report
    /// arriving later with exactly the watermark's `reported_at` is still
    /// picked up; the boundary report gets re-matched, which is idempotent.
    /// A failed record is logged and skipped; the cursor halts before it,
    /// so the next run retries from the failure.
    pub async fn run_matching(&self, partition: Uuid) -> Result<MatchStats> {
        let cursor = self.store.load_cursor("matching", partition).await?;
        let reports = self
            .store
            .reports_in_partition(partition, cursor)
            .await?;
        let assets = self
            .index_assets(self.store.assets_in_partition(partition).await?);
        let now = Utc::now();

        let mut stats = MatchStats::default();
        let mut watermark = cursor;
        // The cursor stops at the first failure so the failed record (and
        // everything after it) is retried next run. Later records in this
        // batch are still processed; re-matching them is idempotent.
        let mut halted = false;
        for report in &reports {
            if report.state.is_terminal() {
                // Frozen reports still advance the cursor: skipping is a decision.
                if !halted {
                    watermark = Some(report.reported_at);
                }
                continue;
            }
            stats.scanned += 1;
            let result = self.match_against(report, &assets, now);
            match self.commit_match(report, &result).await {
                Ok(()) => {
                    match result.outcome {
                        MatchOutcome::AutoMatched => stats.auto_matched += 1,
                        MatchOutcome::Ambiguous => stats.ambiguous += 1,
                        MatchOutcome::Unmatched => stats.unmatched += 1,
                    }
                    if !halted {
                        watermark = Some(report.reported_at);
                    }
                }
                Err(e) => {
                    warn!(report_id = %report.id, error = %e, "match commit failed, will retry");
                    stats.errors += 1;
                    halted = true;
                }
            }
        }

        if let Some(w) = watermark {
            if Some(w) != cursor {
                self.store.save_cursor("matching", partition, w).await?;
            }
        }
        info!(%partition, "matching pass: {stats}");
        Ok(stats)
    }

    /// Re-cluster the partition's recent reports into duplicate groups,
    /// honoring moderator pins, and replace the stored clusters.
    pub async fn run_duplicate_detection(&self, partition: Uuid) -> Result<DedupStats> {
        let reports = self.store.reports_in_partition(partition, None).await?;
        let pins = self.store.cluster_pins(partition).await?;
        let existing = self.store.clusters_in_partition(partition).await?;

        let outcome = cluster_reports(&reports, &pins, &existing, &self.cfg);
        for (a, b) in &outcome.pin_conflicts {
            warn!(pin_a = %a, pin_b = %b, "contradictory cluster pins, left unclustered");
        }

        let stats = DedupStats {
            scanned: reports.len(),
            clusters: outcome.clusters.len(),
            duplicates: outcome
                .clusters
                .iter()
                .map(|c| c.member_ids.len().saturating_sub(1))
                .sum(),
            pin_conflicts: outcome.pin_conflicts.len(),
        };
        self.store.replace_clusters(partition, outcome.clusters).await?;
        info!(%partition, "duplicate detection pass: {stats}");
        Ok(stats)
    }

    /// Recompute condition discrepancies for every asset with recent
    /// linked reports. Assets whose reports no longer diverge from the
    /// official condition have their rows cleared.
    pub async fn run_discrepancy_scan(&self, partition: Uuid) -> Result<DiscrepancyStats> {
        let now = Utc::now();
        let window_start = now - Duration::days(self.cfg.observation_window_days);

        let reports = self.store.reports_in_partition(partition, None).await?;
        let clusters = self.store.clusters_in_partition(partition).await?;
        let assets = self.store.assets_in_partition(partition).await?;
        let prior = self.store.discrepancies_in_partition(partition).await?;

        // Duplicates collapse to their canonical report.
        let suppressed: HashSet<Uuid> = clusters
            .iter()
            .flat_map(|c| c.member_ids.iter().copied().filter(|id| *id != c.canonical_id))
            .collect();

        let mut by_asset: HashMap<Uuid, Vec<&Report>> = HashMap::new();
        for report in &reports {
            if report.reported_at < window_start
                || report.state == ReportState::Rejected
                || suppressed.contains(&report.id)
            {
                continue;
            }
            if let Some(asset_id) = report.asset_id {
                by_asset.entry(asset_id).or_default().push(report);
            }
        }

        let mut stats = DiscrepancyStats::default();
        let mut rows = Vec::new();
        for asset in &assets {
            let Some(asset_reports) = by_asset.get(&asset.id) else {
                continue;
            };
            stats.assets_evaluated += 1;
            if let Some(row) = compute_for_asset(asset, asset_reports, now, &self.cfg) {
                rows.push(row);
            }
        }
        rows.sort_by_key(|r| r.asset_id);
        stats.recorded = rows.len();

        let new_assets: HashSet<Uuid> = rows.iter().map(|r| r.asset_id).collect();
        stats.cleared = prior
            .iter()
            .filter(|d| !new_assets.contains(&d.asset_id))
            .count();

        self.store.replace_discrepancies(partition, rows).await?;
        info!(%partition, "discrepancy pass: {stats}");
        Ok(stats)
    }

    /// Re-derive staleness for the partition. Nothing is stored; the
    /// result feeds dashboards and review queues directly.
    pub async fn run_staleness_sweep(&self, partition: Uuid) -> Result<StalenessSweep> {
        let reports = self.store.reports_in_partition(partition, None).await?;
        let verifications = self.store.verifications_in_partition(partition).await?;
        let clusters = self.store.clusters_in_partition(partition).await?;
        let discrepancies = self.store.discrepancies_in_partition(partition).await?;
        let result = sweep(
            &reports,
            &verifications,
            &clusters,
            &discrepancies,
            Utc::now(),
            &self.cfg,
        );
        info!(
            %partition,
            stale_reports = result.stale_report_ids.len(),
            stale_discrepancies = result.stale_discrepancy_assets.len(),
            "staleness sweep"
        );
        Ok(result)
    }

    /// Apply a lifecycle transition under optimistic concurrency and
    /// commit the updated report.
    pub async fn transition_report(
        &self,
        report_id: Uuid,
        expected_version: u64,
        target: ReportState,
        reason: Option<String>,
        acting: Option<Uuid>,
    ) -> Result<TransitionOk, AtlasError> {
        let mut report = self
            .store
            .report(report_id)
            .await
            .map_err(|e| AtlasError::Storage(e.to_string()))?
            .ok_or_else(|| AtlasError::Validation(format!("unknown report {report_id}")))?;
        let evidence = self
            .store
            .evidence_count(report_id)
            .await
            .map_err(|e| AtlasError::Storage(e.to_string()))?;

        let ok = transition(
            &mut report,
            evidence,
            expected_version,
            target,
            reason,
            acting,
            Utc::now(),
        )?;
        self.store
            .commit_report(&report)
            .await
            .map_err(|e| AtlasError::Storage(e.to_string()))?;
        Ok(ok)
    }

    /// Run matching, duplicate detection, and the discrepancy scan over
    /// every partition. Cancellation is honored between passes.
    pub async fn run_all(&self, cancel: &CancelFlag) -> Result<Vec<(Uuid, PartitionStats)>> {
        let partitions = self.partitions().await?;
        let mut out = Vec::new();
        for partition in partitions.partition_ids() {
            if cancel.is_cancelled() {
                info!("reconciliation cancelled, stopping before partition {partition}");
                break;
            }
            let mut stats = PartitionStats::default();
            stats.matching = self.run_matching(partition).await?;
            if cancel.is_cancelled() {
                out.push((partition, stats));
                break;
            }
            stats.dedup = self.run_duplicate_detection(partition).await?;
            if cancel.is_cancelled() {
                out.push((partition, stats));
                break;
            }
            stats.discrepancy = self.run_discrepancy_scan(partition).await?;
            out.push((partition, stats));
        }
        Ok(out)
    }
}
