//! Stateful geofence
//!
//! A `Fence` remembers whether the vehicle was inside its shape on the last
//! update and reports an edge when that changes. The first update only
//! establishes the initial side and never reports a transition.

use crate::geo::shape::{LatLon, Shape};
use crate::types::Timestamp;

/// Direction of a fence crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Enter,
    Exit,
}

/// A fence crossing observed by [`Fence::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FenceTransition {
    pub kind: TransitionKind,
    pub at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct Fence {
    id: String,
    shape: Shape,
    /// `None` until the first update
    inside: Option<bool>,
    last_position: Option<LatLon>,
    last_updated: Option<Timestamp>,
    entered_at: Option<Timestamp>,
    exited_at: Option<Timestamp>,
}

impl Fence {
    pub fn new(id: impl Into<String>, shape: Shape) -> Self {
        Self {
            id: id.into(),
            shape,
            inside: None,
            last_position: None,
            last_updated: None,
            entered_at: None,
            exited_at: None,
        }
    }

    /// Feed a new observed position, returning the crossing if one happened
    pub fn update(&mut self, lat: f64, lon: f64, time: Timestamp) -> Option<FenceTransition> {
        let now_inside = self.shape.is_inside(lat, lon);
        self.last_position = Some(LatLon::new(lat, lon));
        self.last_updated = Some(time);

        let was_inside = self.inside.replace(now_inside)?;
        match (was_inside, now_inside) {
            (false, true) => {
                self.entered_at = Some(time);
                Some(FenceTransition { kind: TransitionKind::Enter, at: time })
            }
            (true, false) => {
                self.exited_at = Some(time);
                Some(FenceTransition { kind: TransitionKind::Exit, at: time })
            }
            _ => None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Current side of the fence, `None` before the first update
    pub fn is_inside(&self) -> Option<bool> {
        self.inside
    }

    pub fn last_position(&self) -> Option<LatLon> {
        self.last_position
    }

    pub fn last_updated(&self) -> Option<Timestamp> {
        self.last_updated
    }

    pub fn entered_at(&self) -> Option<Timestamp> {
        self.entered_at
    }

    pub fn exited_at(&self) -> Option<Timestamp> {
        self.exited_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(secs: i64) -> Timestamp {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_enter_and_exit_edges() {
        let home = LatLon::new(37.460184, -122.166203);
        let mut fence = Fence::new("home", Shape::circle(home, 0.5));
        assert_eq!(fence.is_inside(), None);

        let far = (37.3848558, -121.9947407);
        let path = [far, far, (home.lat, home.lon), (37.4605, -122.1665), far];

        let transitions: Vec<_> = path
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| fence.update(*lat, *lon, at(i as i64 + 1)))
            .collect();

        assert_eq!(
            transitions,
            vec![
                None,
                None,
                Some(FenceTransition { kind: TransitionKind::Enter, at: at(3) }),
                None,
                Some(FenceTransition { kind: TransitionKind::Exit, at: at(5) }),
            ]
        );
        assert_eq!(fence.entered_at(), Some(at(3)));
        assert_eq!(fence.exited_at(), Some(at(5)));
        assert_eq!(fence.is_inside(), Some(false));
        assert_eq!(fence.last_updated(), Some(at(5)));
    }

    #[test]
    fn test_first_update_never_transitions() {
        let center = LatLon::new(10.0, 10.0);
        let mut fence = Fence::new("spot", Shape::circle(center, 1.0));

        assert_eq!(fence.update(center.lat, center.lon, at(1)), None);
        assert_eq!(fence.is_inside(), Some(true));
        assert_eq!(fence.entered_at(), None);
        assert_eq!(fence.last_position(), Some(center));
    }

    #[test]
    fn test_edge_timestamps_are_kept() {
        let rect = Shape::rectangle(LatLon::new(0.0, 0.0), LatLon::new(1.0, 1.0));
        let mut fence = Fence::new("box", rect);

        fence.update(0.5, 0.5, at(1));
        fence.update(2.0, 2.0, at(2));
        fence.update(0.5, 0.5, at(3));

        // Re-entering overwrites enteredAt, the earlier exit stays recorded
        assert_eq!(fence.exited_at(), Some(at(2)));
        assert_eq!(fence.entered_at(), Some(at(3)));
    }
}
