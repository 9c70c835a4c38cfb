//! Geofencing: containment predicates and stateful fences
//!
//! `Shape` answers "is this point inside?" and nothing else. `Fence` wraps a
//! shape and remembers which side of it the vehicle was on, so it can report
//! enter/exit edges.

pub mod fence;
pub mod shape;

// Re-export key types for convenience
pub use fence::{Fence, FenceTransition, TransitionKind};
pub use shape::{LatLon, Shape, EARTH_RADIUS_KM, MIN_POLYGON_VERTICES};
