use std::collections::HashMap;

use geohash::Coord;
use uuid::Uuid;

use atlas_common::types::{haversine_m, GeoPoint, GeographicArea, Report};

/// Maps areas and report locations onto processing partitions.
///
/// A partition is the subtree under one root area. Partitions never share
/// spatial buckets, so passes over different partitions run without shared
/// mutable state. Every report is owned by exactly one partition:
/// 1. the subtree containing its resolved area, when a link provides one;
/// 2. otherwise the partition owning its geohash cell — cells belong to the
///    root whose centroid cell is nearest, with id tie-break. Stable, so a
///    boundary report never gets double-processed.
#[derive(Debug)]
pub struct PartitionMap {
    roots: Vec<GeographicArea>,
    areas: HashMap<Uuid, GeographicArea>,
    precision: usize,
}

impl PartitionMap {
    /// Build from the full area tree. Roots are the areas with no parent.
    pub fn new(areas: Vec<GeographicArea>, precision: usize) -> Self {
        let mut roots: Vec<GeographicArea> = areas
            .iter()
            .filter(|a| a.parent_id.is_none())
            .cloned()
            .collect();
        roots.sort_by_key(|a| a.id);
        let areas = areas.into_iter().map(|a| (a.id, a)).collect();
        Self {
            roots,
            areas,
            precision,
        }
    }

    /// The partition root ids, in stable order.
    pub fn partition_ids(&self) -> Vec<Uuid> {
        self.roots.iter().map(|a| a.id).collect()
    }

    /// The partition owning an area: the root of its subtree.
    pub fn partition_for_area(&self, area_id: Uuid) -> Option<Uuid> {
        let area = self.areas.get(&area_id)?;
        if area.parent_id.is_none() {
            return Some(area.id);
        }
        area.path.first().copied()
    }

    /// The partition owning a report. `linked_area` is the area of the
    /// report's matched asset, when the matcher has committed a link.
    pub fn partition_for_report(&self, report: &Report, linked_area: Option<Uuid>) -> Option<Uuid> {
        if let Some(area_id) = linked_area {
            if let Some(p) = self.partition_for_area(area_id) {
                return Some(p);
            }
        }
        self.partition_for_point(report.location)
    }

    /// Cell-ownership fallback: the report's geohash cell belongs to the
    /// root whose centroid cell center is nearest.
    pub fn partition_for_point(&self, point: GeoPoint) -> Option<Uuid> {
        let cell = geohash::encode(
            Coord {
                x: point.lng.clamp(-180.0, 180.0),
                y: point.lat.clamp(-90.0, 90.0),
            },
            self.precision,
        )
        .ok()?;
        let (center, _, _) = geohash::decode(&cell).ok()?;
        let cell_center = GeoPoint {
            lat: center.y,
            lng: center.x,
        };

        self.roots
            .iter()
            .filter_map(|root| {
                root.centroid
                    .map(|c| (root.id, haversine_m(cell_center, c)))
            })
            .min_by(|(id_a, d_a), (id_b, d_b)| d_a.total_cmp(d_b).then_with(|| id_a.cmp(id_b)))
            .map(|(id, _)| id)
    }
}
