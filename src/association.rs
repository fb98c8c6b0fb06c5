//! Rider / face / helmet association.
//!
//! A rider box is a violation when it fully contains at least one face box and
//! no helmet box. A rider with no visible face is never flagged, even without
//! a helmet: an occluded face is treated as "cannot determine".

use crate::detect::PartitionedDetections;
use crate::geometry::{contains, BoundingBox};

/// Rider boxes flagged as violations, in input order.
pub fn find_violations(
    faces: &[BoundingBox],
    helmets: &[BoundingBox],
    riders: &[BoundingBox],
) -> Vec<BoundingBox> {
    riders
        .iter()
        .filter(|rider| is_violation(rider, faces, helmets))
        .copied()
        .collect()
}

pub fn is_violation(rider: &BoundingBox, faces: &[BoundingBox], helmets: &[BoundingBox]) -> bool {
    let has_face = faces.iter().any(|face| contains(rider, face));
    let has_helmet = helmets.iter().any(|helmet| contains(rider, helmet));
    has_face && !has_helmet
}

impl PartitionedDetections {
    pub fn violations(&self) -> Vec<BoundingBox> {
        find_violations(&self.faces, &self.helmets, &self.riders)
    }
}
