//! Storage seam between the engine and whatever persistence the platform
//! uses. The engine only ever does bounded prefetch reads before a pass and
//! keyed upsert/replace writes after it, so any backend that can answer
//! these queries can host the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use atlas_common::types::{
    ClusterPin, Discrepancy, DuplicateCluster, Evidence, GeographicArea, InfrastructureAsset,
    MatchResult, Report, Verification,
};

use crate::partition::PartitionMap;

/// Read/write access the reconciliation passes need. Derived views (match
/// results, clusters, discrepancies) are always upserted or replaced by
/// key, never appended — this is what makes every pass idempotent and
/// resumable.
#[async_trait]
pub trait ReconStore: Send + Sync {
    // --- Prefetch reads ---

    async fn areas(&self) -> Result<Vec<GeographicArea>>;
    async fn asset(&self, id: Uuid) -> Result<Option<InfrastructureAsset>>;
    async fn assets_in_partition(&self, partition: Uuid) -> Result<Vec<InfrastructureAsset>>;
    async fn report(&self, id: Uuid) -> Result<Option<Report>>;
    /// Reports in a partition, optionally only those submitted at or after
    /// the cursor watermark. Inclusive on purpose: a late arrival sharing
    /// the watermark timestamp must not be skipped, and re-fetching the
    /// already-processed boundary report is safe because matching is
    /// idempotent. Ordered by (reported_at, id).
    async fn reports_in_partition(
        &self,
        partition: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Report>>;
    async fn evidence_count(&self, report_id: Uuid) -> Result<usize>;
    async fn verifications_in_partition(&self, partition: Uuid) -> Result<Vec<Verification>>;
    async fn cluster_pins(&self, partition: Uuid) -> Result<Vec<ClusterPin>>;

    // --- Derived-view writes ---

    async fn match_result(&self, report_id: Uuid) -> Result<Option<MatchResult>>;
    async fn upsert_match_result(&self, result: &MatchResult) -> Result<()>;
    /// Commit or clear the report→asset link.
    async fn link_report(&self, report_id: Uuid, asset_id: Option<Uuid>) -> Result<()>;
    async fn clusters_in_partition(&self, partition: Uuid) -> Result<Vec<DuplicateCluster>>;
    async fn replace_clusters(
        &self,
        partition: Uuid,
        clusters: Vec<DuplicateCluster>,
    ) -> Result<()>;
    async fn discrepancies_in_partition(&self, partition: Uuid) -> Result<Vec<Discrepancy>>;
    async fn replace_discrepancies(&self, partition: Uuid, rows: Vec<Discrepancy>) -> Result<()>;
    /// Write back a transitioned report.
    async fn commit_report(&self, report: &Report) -> Result<()>;

    // --- Batch cursors ---

    async fn load_cursor(&self, pass: &str, partition: Uuid) -> Result<Option<DateTime<Utc>>>;
    async fn save_cursor(&self, pass: &str, partition: Uuid, watermark: DateTime<Utc>)
        -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryStore (tests — no database required)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    areas: Vec<GeographicArea>,
    assets: HashMap<Uuid, InfrastructureAsset>,
    reports: HashMap<Uuid, Report>,
    evidence: Vec<Evidence>,
    verifications: Vec<Verification>,
    pins: Vec<ClusterPin>,
    match_results: HashMap<Uuid, MatchResult>,
    clusters: HashMap<Uuid, Vec<DuplicateCluster>>,
    discrepancies: HashMap<Uuid, Vec<Discrepancy>>,
    cursors: HashMap<(String, Uuid), DateTime<Utc>>,
}

/// In-memory store for tests. Thread-safe; partition resolution reuses the
/// same ownership rule as the engine so tests see production routing.
pub struct MemoryStore {
    partitions: PartitionMap,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new(areas: Vec<GeographicArea>, geohash_precision: usize) -> Self {
        let partitions = PartitionMap::new(areas.clone(), geohash_precision);
        Self {
            partitions,
            inner: Mutex::new(Inner {
                areas,
                ..Inner::default()
            }),
        }
    }

    pub fn add_asset(&self, asset: InfrastructureAsset) {
        self.inner.lock().unwrap().assets.insert(asset.id, asset);
    }

    pub fn add_report(&self, report: Report) {
        self.inner.lock().unwrap().reports.insert(report.id, report);
    }

    pub fn add_evidence(&self, evidence: Evidence) {
        self.inner.lock().unwrap().evidence.push(evidence);
    }

    pub fn add_verification(&self, verification: Verification) {
        self.inner.lock().unwrap().verifications.push(verification);
    }

    pub fn add_pin(&self, pin: ClusterPin) {
        self.inner.lock().unwrap().pins.push(pin);
    }

    /// All stored match results, for assertions.
    pub fn match_results(&self) -> Vec<MatchResult> {
        let mut results: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .match_results
            .values()
            .cloned()
            .collect();
        results.sort_by_key(|r| r.report_id);
        results
    }

    fn partition_of_asset(&self, asset: &InfrastructureAsset) -> Option<Uuid> {
        self.partitions.partition_for_area(asset.area_id)
    }

    fn partition_of_report(&self, inner: &Inner, report: &Report) -> Option<Uuid> {
        let linked_area = report
            .asset_id
            .and_then(|id| inner.assets.get(&id))
            .map(|a| a.area_id);
        self.partitions.partition_for_report(report, linked_area)
    }
}

#[async_trait]
impl ReconStore for MemoryStore {
    async fn areas(&self) -> Result<Vec<GeographicArea>> {
        Ok(self.inner.lock().unwrap().areas.clone())
    }

    async fn asset(&self, id: Uuid) -> Result<Option<InfrastructureAsset>> {
        Ok(self.inner.lock().unwrap().assets.get(&id).cloned())
    }

    async fn assets_in_partition(&self, partition: Uuid) -> Result<Vec<InfrastructureAsset>> {
        let inner = self.inner.lock().unwrap();
        let mut assets: Vec<_> = inner
            .assets
            .values()
            .filter(|a| a.active && self.partition_of_asset(a) == Some(partition))
            .cloned()
            .collect();
        assets.sort_by_key(|a| a.id);
        Ok(assets)
    }

    async fn report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.inner.lock().unwrap().reports.get(&id).cloned())
    }

    async fn reports_in_partition(
        &self,
        partition: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Report>> {
        let inner = self.inner.lock().unwrap();
        let mut reports: Vec<_> = inner
            .reports
            .values()
            .filter(|r| self.partition_of_report(&inner, r) == Some(partition))
            .filter(|r| since.is_none_or(|cursor| r.reported_at >= cursor))
            .cloned()
            .collect();
        reports.sort_by(|a, b| a.reported_at.cmp(&b.reported_at).then_with(|| a.id.cmp(&b.id)));
        Ok(reports)
    }

    async fn evidence_count(&self, report_id: Uuid) -> Result<usize> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .evidence
            .iter()
            .filter(|e| e.report_id == report_id)
            .count())
    }

    async fn verifications_in_partition(&self, partition: Uuid) -> Result<Vec<Verification>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .verifications
            .iter()
            .filter(|v| {
                inner
                    .reports
                    .get(&v.report_id)
                    .is_some_and(|r| self.partition_of_report(&inner, r) == Some(partition))
            })
            .cloned()
            .collect())
    }

    async fn cluster_pins(&self, _partition: Uuid) -> Result<Vec<ClusterPin>> {
        Ok(self.inner.lock().unwrap().pins.clone())
    }

    async fn match_result(&self, report_id: Uuid) -> Result<Option<MatchResult>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .match_results
            .get(&report_id)
            .cloned())
    }

    async fn upsert_match_result(&self, result: &MatchResult) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .match_results
            .insert(result.report_id, result.clone());
        Ok(())
    }

    async fn link_report(&self, report_id: Uuid, asset_id: Option<Uuid>) -> Result<()> {
        if let Some(report) = self.inner.lock().unwrap().reports.get_mut(&report_id) {
            report.asset_id = asset_id;
        }
        Ok(())
    }

    async fn clusters_in_partition(&self, partition: Uuid) -> Result<Vec<DuplicateCluster>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .clusters
            .get(&partition)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_clusters(
        &self,
        partition: Uuid,
        clusters: Vec<DuplicateCluster>,
    ) -> Result<()> {
        self.inner.lock().unwrap().clusters.insert(partition, clusters);
        Ok(())
    }

    async fn discrepancies_in_partition(&self, partition: Uuid) -> Result<Vec<Discrepancy>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .discrepancies
            .get(&partition)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_discrepancies(&self, partition: Uuid, rows: Vec<Discrepancy>) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .discrepancies
            .insert(partition, rows);
        Ok(())
    }

    async fn commit_report(&self, report: &Report) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .reports
            .insert(report.id, report.clone());
        Ok(())
    }

    async fn load_cursor(&self, pass: &str, partition: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .cursors
            .get(&(pass.to_string(), partition))
            .copied())
    }

    async fn save_cursor(
        &self,
        pass: &str,
        partition: Uuid,
        watermark: DateTime<Utc>,
    ) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .cursors
            .insert((pass.to_string(), partition), watermark);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Arc<S> blanket — lets tests share the store for assertions
// ---------------------------------------------------------------------------

#[async_trait]
impl<S: ReconStore + ?Sized> ReconStore for Arc<S> {
    async fn areas(&self) -> Result<Vec<GeographicArea>> {
        (**self).areas().await
    }
    async fn asset(&self, id: Uuid) -> Result<Option<InfrastructureAsset>> {
        (**self).asset(id).await
    }
    async fn assets_in_partition(&self, partition: Uuid) -> Result<Vec<InfrastructureAsset>> {
        (**self).assets_in_partition(partition).await
    }
    async fn report(&self, id: Uuid) -> Result<Option<Report>> {
        (**self).report(id).await
    }
    async fn reports_in_partition(
        &self,
        partition: Uuid,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Report>> {
        (**self).reports_in_partition(partition, since).await
    }
    async fn evidence_count(&self, report_id: Uuid) -> Result<usize> {
        (**self).evidence_count(report_id).await
    }
    async fn verifications_in_partition(&self, partition: Uuid) -> Result<Vec<Verification>> {
        (**self).verifications_in_partition(partition).await
    }
    async fn cluster_pins(&self, partition: Uuid) -> Result<Vec<ClusterPin>> {
        (**self).cluster_pins(partition).await
    }
    async fn match_result(&self, report_id: Uuid) -> Result<Option<MatchResult>> {
        (**self).match_result(report_id).await
    }
    async fn upsert_match_result(&self, result: &MatchResult) -> Result<()> {
        (**self).upsert_match_result(result).await
    }
    async fn link_report(&self, report_id: Uuid, asset_id: Option<Uuid>) -> Result<()> {
        (**self).link_report(report_id, asset_id).await
    }
    async fn clusters_in_partition(&self, partition: Uuid) -> Result<Vec<DuplicateCluster>> {
        (**self).clusters_in_partition(partition).await
    }
    async fn replace_clusters(
        &self,
        partition: Uuid,
        clusters: Vec<DuplicateCluster>,
    ) -> Result<()> {
        (**self).replace_clusters(partition, clusters).await
    }
    async fn discrepancies_in_partition(&self, partition: Uuid) -> Result<Vec<Discrepancy>> {
        (**self).discrepancies_in_partition(partition).await
    }
    async fn replace_discrepancies(&self, partition: Uuid, rows: Vec<Discrepancy>) -> Result<()> {
        (**self).replace_discrepancies(partition, rows).await
    }
    async fn commit_report(&self, report: &Report) -> Result<()> {
        (**self).commit_report(report).await
    }
    async fn load_cursor(&self, pass: &str, partition: Uuid) -> Result<Option<DateTime<Utc>>> {
        (**self).load_cursor(pass, partition).await
    }
    async fn save_cursor(
        &self,
        pass: &str,
        partition: Uuid,
        watermark: DateTime<Utc>,
    ) -> Result<()> {
        (**self).save_cursor(pass, partition, watermark).await
    }
}
