use std::collections::{BTreeMap, BTreeSet};

use geohash::Coord;
use uuid::Uuid;

use atlas_common::types::{haversine_m, GeoPoint};

/// Assets and reports live in disjoint namespaces: an asset query never
/// returns report ids and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    Assets,
    Reports,
}

/// A point within query range, with its great-circle distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: Uuid,
    pub distance_m: f64,
}

/// Geohash bucket-grid index over point locations.
///
/// Proximity queries visit only the cells overlapping the search area, so
/// cost is bounded by candidates near the query point rather than dataset
/// size. No persistence: rebuilt from the canonical store at startup and
/// kept incrementally consistent via insert/update/remove.
#[derive(Debug)]
pub struct SpatialIndex {
    precision: usize,
    cells: BTreeMap<(Namespace, String), BTreeSet<Uuid>>,
    points: BTreeMap<(Namespace, Uuid), GeoPoint>,
}

impl SpatialIndex {
    pub fn new(precision: usize) -> Self {
        Self {
            precision,
            cells: BTreeMap::new(),
            points: BTreeMap::new(),
        }
    }

    pub fn len(&self, ns: Namespace) -> usize {
        self.points.range((ns, Uuid::nil())..=(ns, Uuid::max())).count()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Insert or move a point. Inserting an existing id relocates it.
    pub fn insert(&mut self, ns: Namespace, id: Uuid, point: GeoPoint) {
        self.remove(ns, id);
        let cell = self.cell_of(point);
        self.cells.entry((ns, cell)).or_default().insert(id);
        self.points.insert((ns, id), point);
    }

    /// Alias for insert: an update is a relocation.
    pub fn update(&mut self, ns: Namespace, id: Uuid, point: GeoPoint) {
        self.insert(ns, id, point);
    }

    pub fn remove(&mut self, ns: Namespace, id: Uuid) {
        if let Some(old) = self.points.remove(&(ns, id)) {
            let cell = self.cell_of(old);
            if let Some(bucket) = self.cells.get_mut(&(ns, cell.clone())) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.cells.remove(&(ns, cell));
                }
            }
        }
    }

    /// All points within `radius_m` of `center`, ascending by distance with
    /// id tie-break for reproducibility.
    pub fn query_radius(&self, ns: Namespace, center: GeoPoint, radius_m: f64) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = Vec::new();
        match self.covering_cells(center, radius_m) {
            Some(cells) => {
                for cell in cells {
                    let Some(bucket) = self.cells.get(&(ns, cell)) else {
                        continue;
                    };
                    for &id in bucket {
                        let point = self.points[&(ns, id)];
                        let distance_m = haversine_m(center, point);
                        if distance_m <= radius_m {
                            hits.push(Neighbor { id, distance_m });
                        }
                    }
                }
            }
            // Ring wider than the cell budget: the grid no longer prunes
            // anything useful, scan the namespace directly.
            None => {
                for (&(_, id), &point) in self.points.range((ns, Uuid::nil())..=(ns, Uuid::max()))
                {
                    let distance_m = haversine_m(center, point);
                    if distance_m <= radius_m {
                        hits.push(Neighbor { id, distance_m });
                    }
                }
            }
        }
        hits.sort_by(|a, b| {
            a.distance_m
                .total_cmp(&b.distance_m)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits
    }

    /// The `k` nearest points to `center`. Expands the search ring until
    /// enough candidates are found or the ring covers the globe.
    pub fn query_k_nearest(&self, ns: Namespace, center: GeoPoint, k: usize) -> Vec<Neighbor> {
        // Can't return more points than the namespace holds.
        let want = k.min(self.len(ns));
        if want == 0 {
            return Vec::new();
        }
        // Half the Earth's circumference: past this every point is in range.
        const MAX_RADIUS_M: f64 = 20_015_000.0;
        let mut radius_m = self.cell_height_m() * 2.0;
        loop {
            let hits = self.query_radius(ns, center, radius_m);
            if hits.len() >= want || radius_m >= MAX_RADIUS_M {
                return hits.into_iter().take(k).collect();
            }
            radius_m *= 2.0;
        }
    }

    fn cell_of(&self, point: GeoPoint) -> String {
        // encode only fails on out-of-range coordinates; clamp defends
        // against junk GPS input at the boundary.
        let coord = Coord {
            x: point.lng.clamp(-180.0, 180.0),
            y: point.lat.clamp(-90.0, 90.0),
        };
        geohash::encode(coord, self.precision).unwrap_or_else(|_| "s".repeat(self.precision))
    }

    /// Approximate cell height in meters at the configured precision.
    fn cell_height_m(&self) -> f64 {
        let (_, _, lat_err) = geohash::decode(&"s".repeat(self.precision))
            .unwrap_or((Coord { x: 0.0, y: 0.0 }, 0.1, 0.1));
        // lat_err is the half-height of the cell in degrees.
        lat_err * 2.0 * 111_320.0
    }

    /// Cells overlapping the circle of `radius_m` around `center`,
    /// deduplicated and in sorted order for deterministic traversal.
    ///
    /// Returns None when the ring spans more cells than the enumeration
    /// budget — the caller falls back to a direct namespace scan, which for
    /// such radii visits fewer entries than the grid walk would.
    fn covering_cells(&self, center: GeoPoint, radius_m: f64) -> Option<Vec<String>> {
        const CELL_ENUM_BUDGET: f64 = 4_096.0;

        let lat_delta = radius_m / 111_320.0;
        // Longitude degrees shrink with latitude; keep the divisor off zero.
        let lng_scale = center.lat.to_radians().cos().max(0.01);
        let lng_delta = radius_m / (111_320.0 * lng_scale);

        let (_, lng_err, lat_err) = geohash::decode(&self.cell_of(center))
            .unwrap_or((Coord { x: 0.0, y: 0.0 }, 0.1, 0.1));

        let lat_steps = (2.0 * lat_delta / lat_err) + 2.0;
        let lng_steps = (2.0 * lng_delta / lng_err) + 2.0;
        if lat_steps * lng_steps > CELL_ENUM_BUDGET {
            return None;
        }

        let mut cells = BTreeSet::new();
        let mut lat = center.lat - lat_delta;
        while lat <= center.lat + lat_delta + lat_err {
            let mut lng = center.lng - lng_delta;
            while lng <= center.lng + lng_delta + lng_err {
                cells.insert(self.cell_of(GeoPoint {
                    lat: lat.clamp(-90.0, 90.0),
                    lng: lng.clamp(-180.0, 180.0),
                }));
                lng += lng_err;
            }
            lat += lat_err;
        }
        Some(cells.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    fn index_with(points: &[(Uuid, GeoPoint)]) -> SpatialIndex {
        let mut idx = SpatialIndex::new(6);
        for &(id, point) in points {
            idx.insert(Namespace::Assets, id, point);
        }
        idx
    }

    #[test]
    fn radius_query_ascending_by_distance() {
        let near = Uuid::new_v4();
        let mid = Uuid::new_v4();
        let far = Uuid::new_v4();
        // ~111m per 0.001 degrees latitude
        let idx = index_with(&[
            (far, p(6.4580, 3.3841)),
            (near, p(6.4551, 3.3841)),
            (mid, p(6.4560, 3.3841)),
        ]);

        let hits = idx.query_radius(Namespace::Assets, p(6.4550, 3.3841), 200.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, near);
        assert_eq!(hits[1].id, mid);
        assert!(hits[0].distance_m < hits[1].distance_m);
    }

    #[test]
    fn radius_query_excludes_out_of_range() {
        let id = Uuid::new_v4();
        let idx = index_with(&[(id, p(6.4550, 3.3841))]);
        // ~500m away
        let hits = idx.query_radius(Namespace::Assets, p(6.4595, 3.3841), 250.0);
        assert!(hits.is_empty());
    }

    #[test]
    fn namespaces_are_disjoint() {
        let asset = Uuid::new_v4();
        let report = Uuid::new_v4();
        let mut idx = SpatialIndex::new(6);
        idx.insert(Namespace::Assets, asset, p(6.4550, 3.3841));
        idx.insert(Namespace::Reports, report, p(6.4550, 3.3841));

        let hits = idx.query_radius(Namespace::Assets, p(6.4550, 3.3841), 50.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, asset);

        let hits = idx.query_radius(Namespace::Reports, p(6.4550, 3.3841), 50.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, report);
    }

    #[test]
    fn update_relocates_point() {
        let id = Uuid::new_v4();
        let mut idx = SpatialIndex::new(6);
        idx.insert(Namespace::Reports, id, p(6.4550, 3.3841));
        idx.update(Namespace::Reports, id, p(9.0765, 7.3986));

        assert!(idx
            .query_radius(Namespace::Reports, p(6.4550, 3.3841), 1_000.0)
            .is_empty());
        let hits = idx.query_radius(Namespace::Reports, p(9.0765, 7.3986), 100.0);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let id = Uuid::new_v4();
        let mut idx = SpatialIndex::new(6);
        idx.insert(Namespace::Assets, id, p(6.4550, 3.3841));
        idx.remove(Namespace::Assets, id);
        idx.remove(Namespace::Assets, id);
        assert!(idx.is_empty());
    }

    #[test]
    fn k_nearest_reaches_across_sparse_continental_data() {
        let lagos = Uuid::new_v4();
        let nairobi = Uuid::new_v4();
        // ~3,800km apart: the ring must grow far past any sane cell
        // enumeration, exercising the direct-scan fallback.
        let idx = index_with(&[
            (lagos, p(6.4550, 3.3841)),
            (nairobi, p(-1.2921, 36.8219)),
        ]);

        let hits = idx.query_k_nearest(Namespace::Assets, p(6.4550, 3.3841), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, lagos);
        assert_eq!(hits[1].id, nairobi);
        assert!(hits[1].distance_m > 3_000_000.0);
    }

    #[test]
    fn huge_radius_query_returns_every_point() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let idx = index_with(&[(a, p(6.4550, 3.3841)), (b, p(-1.2921, 36.8219))]);
        let hits = idx.query_radius(Namespace::Assets, p(0.0, 20.0), 10_000_000.0);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn k_nearest_expands_past_cell_boundaries() {
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        // far is ~11km out, well beyond the initial ring at precision 6
        let idx = index_with(&[(near, p(6.4560, 3.3841)), (far, p(6.5550, 3.3841))]);

        let hits = idx.query_k_nearest(Namespace::Assets, p(6.4550, 3.3841), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, near);
        assert_eq!(hits[1].id, far);
    }

    #[test]
    fn k_nearest_ties_break_by_id() {
        let mut ids = [Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let point = p(6.4550, 3.3841);
        let idx = index_with(&[(ids[1], point), (ids[0], point)]);

        let hits = idx.query_k_nearest(Namespace::Assets, point, 2);
        assert_eq!(hits[0].id, ids[0]);
        assert_eq!(hits[1].id, ids[1]);
    }
}
