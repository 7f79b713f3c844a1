use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Haversine great-circle distance between two points in meters.
/// All coordinates are WGS84; every distance in the engine goes through this.
pub fn haversine_m(a: GeoPoint, b: GeoPoint) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_M * c
}

// --- Geography ---

/// Administrative levels for the geographic hierarchy.
/// Covers diverse governance structures (state/province, district/county/LGA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    Country,
    State,
    Province,
    District,
    County,
    Lga,
    Ward,
    Village,
}

/// A node in the strict geographic area tree. Unique per
/// (name, country_code, admin_level, parent).
///
/// `path` is the materialized ancestor chain (root first, excluding self),
/// so subtree containment is a prefix check instead of a recursive walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeographicArea {
    pub id: Uuid,
    pub name: String,
    /// ISO 3166-1 alpha-3 (e.g. NGA, KEN, ZAF).
    pub country_code: String,
    pub admin_level: AdminLevel,
    pub parent_id: Option<Uuid>,
    pub path: Vec<Uuid>,
    pub centroid: Option<GeoPoint>,
    pub population: Option<u32>,
    pub active: bool,
}

impl GeographicArea {
    /// True when `self` sits inside the subtree rooted at `root_id`
    /// (including the root itself).
    pub fn in_subtree(&self, root_id: Uuid) -> bool {
        self.id == root_id || self.path.contains(&root_id)
    }
}

// --- Infrastructure Assets ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    School,
    Clinic,
    Hospital,
    WaterPoint,
    Borehole,
    Road,
    Bridge,
    Sanitation,
    Electricity,
    Market,
    GovernmentOffice,
    Other,
}

impl AssetType {
    /// Linear assets (roads, bridges) get a wider match cutoff than
    /// point assets — a pothole report can be far from the road centroid.
    pub fn is_linear(&self) -> bool {
        matches!(self, AssetType::Road | AssetType::Bridge)
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetType::School => "school",
            AssetType::Clinic => "clinic",
            AssetType::Hospital => "hospital",
            AssetType::WaterPoint => "water_point",
            AssetType::Borehole => "borehole",
            AssetType::Road => "road",
            AssetType::Bridge => "bridge",
            AssetType::Sanitation => "sanitation",
            AssetType::Electricity => "electricity",
            AssetType::Market => "market",
            AssetType::GovernmentOffice => "government_office",
            AssetType::Other => "other",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetCondition {
    Functional,
    PartiallyFunctional,
    NonFunctional,
    UnderConstruction,
    Abandoned,
    Unknown,
}

impl AssetCondition {
    /// Position on the functional → non-functional ordinal scale.
    /// Conditions with no functional baseline (under construction, abandoned,
    /// unknown) return None and are excluded from discrepancy comparison.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            AssetCondition::Functional => Some(0),
            AssetCondition::PartiallyFunctional => Some(1),
            AssetCondition::NonFunctional => Some(2),
            AssetCondition::UnderConstruction
            | AssetCondition::Abandoned
            | AssetCondition::Unknown => None,
        }
    }
}

impl std::fmt::Display for AssetCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AssetCondition::Functional => "functional",
            AssetCondition::PartiallyFunctional => "partially_functional",
            AssetCondition::NonFunctional => "non_functional",
            AssetCondition::UnderConstruction => "under_construction",
            AssetCondition::Abandoned => "abandoned",
            AssetCondition::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// A normalized infrastructure record. Location is required; every asset
/// resolves to exactly one geographic area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfrastructureAsset {
    pub id: Uuid,
    pub asset_type: AssetType,
    pub official_name: Option<String>,
    pub local_name: Option<String>,
    pub description: String,
    pub location: GeoPoint,
    pub area_id: Uuid,
    pub condition: AssetCondition,
    pub condition_verified_at: Option<DateTime<Utc>>,
    /// Official government identifier, if any.
    pub official_id: Option<String>,
    pub verified: bool,
    pub active: bool,
}

impl InfrastructureAsset {
    /// Best display/matching name: official first, local fallback.
    pub fn name(&self) -> Option<&str> {
        self.official_name
            .as_deref()
            .or(self.local_name.as_deref())
    }
}

// --- Reports ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Working,
    PartiallyWorking,
    Broken,
    Inaccessible,
    Unknown,
}

impl ReportedStatus {
    /// Severity rank for consensus tie-breaks, least to most severe.
    /// Unknown is excluded from the vote entirely.
    pub fn severity_rank(&self) -> Option<u8> {
        match self {
            ReportedStatus::Working => Some(0),
            ReportedStatus::PartiallyWorking => Some(1),
            ReportedStatus::Broken => Some(2),
            ReportedStatus::Inaccessible => Some(3),
            ReportedStatus::Unknown => None,
        }
    }

    /// Position on the shared functional → non-functional ordinal scale,
    /// comparable against `AssetCondition::ordinal`. Inaccessible maps to
    /// the non-functional end: the service is unusable either way.
    pub fn ordinal(&self) -> Option<u8> {
        match self {
            ReportedStatus::Working => Some(0),
            ReportedStatus::PartiallyWorking => Some(1),
            ReportedStatus::Broken | ReportedStatus::Inaccessible => Some(2),
            ReportedStatus::Unknown => None,
        }
    }
}

impl std::fmt::Display for ReportedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReportedStatus::Working => "working",
            ReportedStatus::PartiallyWorking => "partially_working",
            ReportedStatus::Broken => "broken",
            ReportedStatus::Inaccessible => "inaccessible",
            ReportedStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReporterType {
    Citizen,
    GovernmentOfficial,
    Ngo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Submitted,
    UnderReview,
    Verified,
    Rejected,
    Resolved,
}

impl ReportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportState::Rejected | ReportState::Resolved)
    }
}

impl std::fmt::Display for ReportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReportState::Submitted => "submitted",
            ReportState::UnderReview => "under_review",
            ReportState::Verified => "verified",
            ReportState::Rejected => "rejected",
            ReportState::Resolved => "resolved",
        };
        write!(f, "{s}")
    }
}

/// A citizen/official/NGO observation about infrastructure condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    /// Linked asset, set by the matcher or a moderator. None for new/unknown assets.
    pub asset_id: Option<Uuid>,
    /// Inferred type, required even when no asset is linked.
    pub infrastructure_type: AssetType,
    pub reported_status: ReportedStatus,
    pub description: String,
    pub location: GeoPoint,
    /// GPS accuracy in meters, if the device provided one.
    pub location_accuracy_m: Option<u32>,
    pub reporter_type: ReporterType,
    /// Acting identity of the submitter. None only when anonymous.
    pub reporter_id: Option<Uuid>,
    pub is_anonymous: bool,
    /// Permits absence of evidence through the review gate.
    pub low_confidence: bool,
    pub state: ReportState,
    pub rejection_reason: Option<String>,
    pub reported_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    /// Monotonic counter for optimistic concurrency on state transitions.
    pub version: u64,
}

// --- Evidence & Verification ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    Photo,
    Video,
    Document,
    Audio,
    Link,
}

/// Evidence attached to a report. The storage layer computes the SHA-256
/// hash on upload; the engine only reads counts and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub id: Uuid,
    pub report_id: Uuid,
    pub evidence_type: EvidenceType,
    /// File path or external URL.
    pub content_ref: String,
    /// SHA-256 hex digest of the content, for integrity verification.
    pub content_hash: String,
    pub size_bytes: Option<u64>,
    /// When the evidence was captured (EXIF or user input), if known.
    pub captured_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMethod {
    SiteVisit,
    Document,
    Photo,
    CrossReference,
    Other,
}

/// A verification action against a report. Confirmed verifications reset
/// the staleness clock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub id: Uuid,
    pub report_id: Uuid,
    pub verified_by: Option<Uuid>,
    pub method: VerificationMethod,
    pub notes: String,
    pub is_confirmed: bool,
    pub verified_at: DateTime<Utc>,
}

// --- Engine Outputs ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    /// Score cleared the auto-match threshold; the link is committed.
    AutoMatched,
    /// A candidate exists but below threshold; retained as a suggestion
    /// for manual resolution, not committed.
    Ambiguous,
    /// No candidate in range, or every candidate scored zero.
    Unmatched,
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MatchOutcome::AutoMatched => "auto_matched",
            MatchOutcome::Ambiguous => "ambiguous",
            MatchOutcome::Unmatched => "unmatched",
        };
        write!(f, "{s}")
    }
}

/// Matcher output for one report. Upserted by report id — re-running the
/// matcher replaces, never appends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub report_id: Uuid,
    /// Best candidate. Committed for AutoMatched, a suggestion for Ambiguous,
    /// None for Unmatched.
    pub asset_id: Option<Uuid>,
    pub score: f64,
    pub outcome: MatchOutcome,
    pub computed_at: DateTime<Utc>,
}

/// A set of reports referring to the same real-world issue.
/// Members are ordered by submission time; the canonical report is the earliest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub id: Uuid,
    pub member_ids: Vec<Uuid>,
    pub canonical_id: Uuid,
}

impl DuplicateCluster {
    pub fn is_duplicate(&self, report_id: Uuid) -> bool {
        report_id != self.canonical_id && self.member_ids.contains(&report_id)
    }
}

/// A moderator override on duplicate clustering. Pins survive re-clustering:
/// merges are always-present edges, separations always-absent ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ClusterPin {
    ForceMerge { a: Uuid, b: Uuid },
    ForceSeparate { a: Uuid, b: Uuid },
}

impl ClusterPin {
    pub fn pair(&self) -> (Uuid, Uuid) {
        match *self {
            ClusterPin::ForceMerge { a, b } | ClusterPin::ForceSeparate { a, b } => (a, b),
        }
    }
}

/// A detected divergence between official asset condition and citizen
/// consensus. Derived and re-computable: scans replace rows per asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discrepancy {
    pub asset_id: Uuid,
    pub official_condition: AssetCondition,
    pub consensus_status: ReportedStatus,
    /// Normalized ordinal distance, (0, 1].
    pub severity: f64,
    /// Non-duplicate corroborating reports in the observation window.
    pub support_count: u32,
    /// severity × log-scaled support × recency decay.
    pub priority: f64,
    pub computed_at: DateTime<Utc>,
}
