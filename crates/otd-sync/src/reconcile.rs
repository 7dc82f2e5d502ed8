//! Per-day diff between stored events and freshly parsed facts.

use otd_core::{EventRecord, EventUpdate, Fact, NewEvent, TargetDay};
use serde::Serialize;
use strsim::jaro_winkler;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;

#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    pub similarity_threshold: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl ReconcileConfig {
    /// Clamps `threshold` into `0.0..=1.0`; non-finite values fall back to the default.
    pub fn with_threshold(threshold: f64) -> Self {
        let similarity_threshold = if threshold.is_finite() {
            threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_SIMILARITY_THRESHOLD
        };
        Self {
            similarity_threshold,
        }
    }
}

/// Lowercased alphanumeric tokens, sorted, joined by single spaces.
pub fn normalize_description(input: &str) -> String {
    let lowered = input.to_lowercase();
    let mut tokens = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Jaro-Winkler over normalized descriptions. Symmetric in its arguments and
/// insensitive to case, punctuation and word order.
pub fn description_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_description(a);
    let nb = normalize_description(b);
    if na.is_empty() || nb.is_empty() {
        return if a == b { 1.0 } else { 0.0 };
    }
    let (first, second) = if na <= nb { (&na, &nb) } else { (&nb, &na) };
    jaro_winkler(first, second)
}

/// What to do with one day's stored events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    pub keep: Vec<EventRecord>,
    pub update: Vec<EventUpdate>,
    pub insert: Vec<NewEvent>,
    pub delete: Vec<EventRecord>,
}

impl Reconciliation {
    pub fn is_noop(&self) -> bool {
        self.update.is_empty() && self.insert.is_empty() && self.delete.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn is_similar(&self, stored: &str, fresh: &str) -> bool {
        description_similarity(stored, fresh) >= self.config.similarity_threshold
    }

    /// Matches each fact, in order, against the still-unmatched records of
    /// its date: exact description first, then a similar one. The first
    /// candidate in `existing` order wins. Leftover records are deleted.
    pub fn reconcile(&self, day: TargetDay, existing: Vec<EventRecord>, facts: &[Fact]) -> Reconciliation {
        let mut unmatched: Vec<Option<EventRecord>> = existing.into_iter().map(Some).collect();
        let mut plan = Reconciliation::default();

        for fact in facts {
            debug_assert!(day.matches(fact.date()));
            let date = fact.date();

            let exact = unmatched.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|r| r.date == date && r.description == fact.description)
            });
            if let Some(record) = exact.and_then(|i| unmatched[i].take()) {
                plan.keep.push(record);
                continue;
            }

            let similar = unmatched.iter().position(|slot| {
                slot.as_ref()
                    .is_some_and(|r| r.date == date && self.is_similar(&r.description, &fact.description))
            });
            if let Some(record) = similar.and_then(|i| unmatched[i].take()) {
                plan.update.push(EventUpdate {
                    id: record.id,
                    date: record.date,
                    previous: record.description,
                    description: fact.description.clone(),
                });
                continue;
            }

            plan.insert.push(NewEvent {
                date,
                description: fact.description.clone(),
            });
        }

        plan.delete = unmatched.into_iter().flatten().collect();
        plan
    }
}
