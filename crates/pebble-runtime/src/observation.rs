//! [`ObservationMemory`] – who and what the robot has recently reacted to.
//!
//! An entity re-triggers its "appeared" reaction only after its category
//! cooldown has elapsed since it was last recorded.  Callers pass the current
//! instant explicitly so the control loop can use Tokio's (pausable) clock.

use std::collections::HashMap;
use std::time::Duration;

use pebble_types::EntityId;
use tokio::time::Instant;

/// Key of one remembered entity.  Faces and objects have separate id spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sighting {
    Face(EntityId),
    Object(EntityId),
}

/// Last-seen table with per-category cooldowns.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use pebble_runtime::observation::{ObservationMemory, Sighting};
/// use tokio::time::Instant;
///
/// let mut memory = ObservationMemory::new(Duration::from_secs(60), Duration::from_secs(300));
/// let now = Instant::now();
/// assert!(memory.should_react(Sighting::Face(1), now));
/// memory.record(Sighting::Face(1), now);
/// assert!(!memory.should_react(Sighting::Face(1), now));
/// ```
#[derive(Debug)]
pub struct ObservationMemory {
    face_cooldown: Duration,
    object_cooldown: Duration,
    last_seen: HashMap<Sighting, Instant>,
}

impl ObservationMemory {
    pub fn new(face_cooldown: Duration, object_cooldown: Duration) -> Self {
        Self {
            face_cooldown,
            object_cooldown,
            last_seen: HashMap::new(),
        }
    }

    fn cooldown(&self, sighting: Sighting) -> Duration {
        match sighting {
            Sighting::Face(_) => self.face_cooldown,
            Sighting::Object(_) => self.object_cooldown,
        }
    }

    /// `true` when `sighting` is new or was last recorded more than its
    /// cooldown before `now`.
    pub fn should_react(&self, sighting: Sighting, now: Instant) -> bool {
        match self.last_seen.get(&sighting) {
            Some(seen) => now.saturating_duration_since(*seen) > self.cooldown(sighting),
            None => true,
        }
    }

    pub fn record(&mut self, sighting: Sighting, now: Instant) {
        self.last_seen.insert(sighting, now);
    }

    /// Forget every entry whose cooldown has expired.  Returns how many were
    /// removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let (faces, objects) = (self.face_cooldown, self.object_cooldown);
        let before = self.last_seen.len();
        self.last_seen.retain(|sighting, seen| {
            let cooldown = match sighting {
                Sighting::Face(_) => faces,
                Sighting::Object(_) => objects,
            };
            now.saturating_duration_since(*seen) <= cooldown
        });
        before - self.last_seen.len()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory() -> ObservationMemory {
        ObservationMemory::new(Duration::from_secs(60), Duration::from_secs(300))
    }

    #[test]
    fn face_cooldown_is_strict() {
        let mut m = memory();
        let t0 = Instant::now();
        m.record(Sighting::Face(7), t0);
        assert!(!m.should_react(Sighting::Face(7), t0 + Duration::from_secs(30)));
        assert!(!m.should_react(Sighting::Face(7), t0 + Duration::from_secs(60)));
        assert!(m.should_react(Sighting::Face(7), t0 + Duration::from_secs(61)));
    }

    #[test]
    fn object_cooldown_is_longer() {
        let mut m = memory();
        let t0 = Instant::now();
        m.record(Sighting::Object(7), t0);
        assert!(!m.should_react(Sighting::Object(7), t0 + Duration::from_secs(120)));
        assert!(m.should_react(Sighting::Object(7), t0 + Duration::from_secs(301)));
        // Same id, other category: unaffected.
        assert!(m.should_react(Sighting::Face(7), t0));
    }

    #[test]
    fn sweep_drops_only_expired_entries() {
        let mut m = memory();
        let t0 = Instant::now();
        m.record(Sighting::Face(1), t0);
        m.record(Sighting::Object(2), t0);
        assert_eq!(m.sweep(t0 + Duration::from_secs(90)), 1);
        assert_eq!(m.len(), 1);
        assert!(m.should_react(Sighting::Face(1), t0 + Duration::from_secs(90)));
        assert_eq!(m.sweep(t0 + Duration::from_secs(400)), 1);
        assert!(m.is_empty());
    }
}
