//! Per-key reduce step: closes the merge over everything the chunks appended
//! and picks the start of the chain the key currently belongs to.

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::Arc;

use super::key_store::KeyStore;
use crate::error::{Error, Result};
use crate::formats::Interval;

/// Reconciled activation date of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledResult {
    pub key: String,
    pub date: NaiveDate,
}

/// Reads a key's accumulated intervals and reconciles them
///
/// Reconciling never mutates the store; discarding it is up to the caller.
#[derive(Clone)]
pub struct KeyReconciler {
    key_store: Arc<dyn KeyStore>,
}

impl KeyReconciler {
    pub fn new(key_store: Arc<dyn KeyStore>) -> Self {
        Self { key_store }
    }

    pub async fn reconcile(&self, key: &str) -> Result<ReconciledResult> {
        let intervals = self.key_store.read_all(key).await?;
        reconcile_intervals(key, intervals)
    }
}

/// Reconcile one key's intervals, in any order
pub fn reconcile_intervals(key: &str, intervals: Vec<Interval>) -> Result<ReconciledResult> {
    let most_recent = intervals
        .iter()
        .min_by(|a, b| a.recency_cmp(b))
        .cloned()
        .ok_or_else(|| Error::Reconciliation {
            key: key.to_string(),
            reason: "no intervals were accumulated".to_string(),
        })?;

    let chains = merge_to_fixpoint(dedup_sorted(intervals), &most_recent);
    let current = select_current_chain(&chains).ok_or_else(|| Error::Reconciliation {
        key: key.to_string(),
        reason: "most recent interval is not part of any chain".to_string(),
    })?;

    Ok(ReconciledResult {
        key: key.to_string(),
        date: current.span.start,
    })
}

/// A merged interval, flagged when the key's most recent interval is in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    pub span: Interval,
    pub current: bool,
}

impl Chain {
    fn absorb(&mut self, older: &Chain) {
        self.span.absorb(&older.span);
        self.current |= older.current;
    }
}

fn dedup_sorted(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by(Interval::recency_cmp);
    intervals.dedup();
    intervals
}

/// Merge touching intervals until no two remaining chains touch
///
/// Takes deduplicated intervals in recency order, so exactly one chain starts
/// out current. Each pass folds every interval into the chain starting on the
/// day it ends; passes repeat until one makes no merge.
fn merge_to_fixpoint(intervals: Vec<Interval>, most_recent: &Interval) -> Vec<Chain> {
    let mut chains: Vec<Chain> = intervals
        .into_iter()
        .map(|span| Chain {
            current: &span == most_recent,
            span,
        })
        .collect();

    loop {
        let before = chains.len();
        chains = merge_pass(chains);
        if chains.len() == before {
            return chains;
        }
        chains.sort_by(|a, b| a.span.recency_cmp(&b.span));
    }
}

fn merge_pass(intervals: Vec<Chain>) -> Vec<Chain> {
    let mut chains: Vec<Chain> = Vec::with_capacity(intervals.len());
    // Chain start date -> position in `chains` of the first chain starting there
    let mut by_start: HashMap<NaiveDate, usize> = HashMap::new();

    for interval in intervals {
        let target = interval
            .span
            .end
            .and_then(|end| by_start.get(&end).copied());

        match target {
            Some(idx) => {
                let old_start = chains[idx].span.start;
                chains[idx].absorb(&interval);
                by_start.remove(&old_start);
                by_start.entry(chains[idx].span.start).or_insert(idx);
            }
            None => {
                by_start.entry(interval.span.start).or_insert(chains.len());
                chains.push(interval);
            }
        }
    }

    chains
}

/// The merged chain the most recent interval ended up in
pub fn select_current_chain(chains: &[Chain]) -> Option<&Chain> {
    chains.iter().find(|c| c.current)
}
