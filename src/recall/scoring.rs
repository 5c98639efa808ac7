// src/recall/scoring.rs
// Composite scoring - one ranking algorithm for every search strategy

use chrono::{DateTime, Utc};

use crate::types::RetrievedMemory;

const SEARCH_WEIGHT: f64 = 0.5;
const IMPORTANCE_WEIGHT: f64 = 0.3;
const RECENCY_WEIGHT: f64 = 0.2;
const RECENCY_HORIZON_DAYS: f64 = 30.0;

#[derive(Clone, Default)]
pub struct CompositeScorer;

impl CompositeScorer {
    pub fn new() -> Self {
        Self
    }

    /// Score and sort in place: composite descending, created_at descending
    /// on ties.
    pub fn rerank(&self, results: &mut Vec<RetrievedMemory>, now: DateTime<Utc>) {
        for result in results.iter_mut() {
            let recency = self.recency_score(result.created_at, now);
            result.composite_score = SEARCH_WEIGHT * result.search_score
                + IMPORTANCE_WEIGHT * result.importance_score
                + RECENCY_WEIGHT * recency;
        }

        results.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
    }

    /// Linear decay to zero over the horizon: 1 today, 0 at 30 days.
    pub fn recency_score(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_days = (now - created_at).num_seconds() as f64 / 86_400.0;
        (1.0 - age_days / RECENCY_HORIZON_DAYS).max(0.0)
    }
}
