//! Duck trigger lifecycle.
//!
//! A zone ducks its background stream while at least one trigger is active.
//! Triggers are keyed by id; adding an existing id overwrites its kind and
//! adjustment, removing an unknown id is a no-op. The set is owned by the
//! zone actor, so no locking is required.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What kind of foreground stream holds the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuckKind {
    Speech,
    Video,
    Other,
}

/// A named reason ducking is active.
#[derive(Debug, Clone, PartialEq)]
pub struct DuckTrigger {
    pub id: String,
    pub kind: DuckKind,
    /// Per-trigger ducking adjustment override in [-100, 0].
    pub adjust: Option<i32>,
}

/// A duck edge produced by a channel, to be fanned out to sibling zones.
#[derive(Debug, Clone, PartialEq)]
pub enum DuckEdge {
    Started {
        id: String,
        kind: DuckKind,
        adjust: Option<i32>,
    },
    Ended {
        id: String,
    },
}

/// Aggregate view of the active trigger set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuckSnapshot {
    pub count: usize,
    pub speech: usize,
    pub video: usize,
    pub other: usize,
}

/// The duck state a channel sees when resolving a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuckView {
    pub active: bool,
    /// Effective adjustment for the current trigger set.
    pub adjust: i32,
}

/// Fallback adjustments used when a trigger carries no override.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDefaults {
    /// Zone-level override for speech triggers.
    pub speech: Option<i32>,
    /// Zone-level override for video triggers.
    pub video: Option<i32>,
    /// Zone `ducking_adjust`, the last resort.
    pub fallback: i32,
}

#[derive(Debug, Default)]
pub struct DuckLifecycle {
    triggers: HashMap<String, (DuckKind, Option<i32>)>,
}

impl DuckLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trigger. Same id overwrites kind and adjustment.
    pub fn add(&mut self, trigger: DuckTrigger) {
        self.triggers
            .insert(trigger.id, (trigger.kind, trigger.adjust));
    }

    /// Remove a trigger. Unknown id is a no-op.
    pub fn remove(&mut self, id: &str) -> bool {
        self.triggers.remove(id).is_some()
    }

    pub fn clear(&mut self) {
        self.triggers.clear();
    }

    /// Remove every trigger of the given kind, returning the removed ids.
    pub fn clear_kind(&mut self, kind: DuckKind) -> Vec<String> {
        let ids: Vec<String> = self
            .triggers
            .iter()
            .filter(|(_, (k, _))| *k == kind)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            self.triggers.remove(id);
        }
        ids
    }

    pub fn active(&self) -> bool {
        !self.triggers.is_empty()
    }

    pub fn snapshot(&self) -> DuckSnapshot {
        let mut snapshot = DuckSnapshot {
            count: self.triggers.len(),
            ..DuckSnapshot::default()
        };
        for (kind, _) in self.triggers.values() {
            match kind {
                DuckKind::Speech => snapshot.speech += 1,
                DuckKind::Video => snapshot.video += 1,
                DuckKind::Other => snapshot.other += 1,
            }
        }
        snapshot
    }

    /// Effective ducking adjustment across active triggers.
    ///
    /// Each trigger resolves to its own override, else the kind-specific zone
    /// override, else the zone fallback; the strongest (most negative) wins.
    /// Returns the fallback when no triggers are active.
    pub fn effective_adjust(&self, defaults: &DuckDefaults) -> i32 {
        self.triggers
            .values()
            .map(|(kind, adjust)| {
                adjust.unwrap_or(match kind {
                    DuckKind::Speech => defaults.speech.unwrap_or(defaults.fallback),
                    DuckKind::Video => defaults.video.unwrap_or(defaults.fallback),
                    DuckKind::Other => defaults.fallback,
                })
            })
            .min()
            .unwrap_or(defaults.fallback)
    }
}
