//! Append-only bounded request log.
//!
//! A FIFO ring of (request, winning mapping, response) triples. Appends go
//! through a single writer lock; readers copy an entry snapshot out. No
//! persistence: reset drops everything.

use crate::matching::MatchTree;
use crate::message::{HeaderMultimap, RequestMessage};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// How a request was concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// A mapping matched and its response was emitted.
    Served,
    /// No mapping reached the acceptance threshold; the fallback was sent.
    NoMatch,
    /// The request was abandoned mid-flight (client gone or server
    /// stopping).
    Canceled,
    /// Response generation failed; a diagnostic response was sent.
    Error,
}

/// What was sent back over the wire, frozen at completion time.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HeaderMultimap,
    pub body: Bytes,
}

/// Candidate mapping that scored above zero but was not selected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialCandidate {
    pub mapping_id: Uuid,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct LogTiming {
    pub started: DateTime<Utc>,
    pub matched_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

/// Upstream call details for proxied responses.
#[derive(Debug, Clone)]
pub struct ProxyMetadata {
    pub target_url: String,
    pub latency: Duration,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: Uuid,
    pub request: RequestMessage,
    /// The winner at match time; the mapping may have been deleted since.
    pub matched_mapping_id: Option<Uuid>,
    pub partial_candidates: Vec<PartialCandidate>,
    pub response: ResponseSnapshot,
    pub timing: LogTiming,
    pub proxy: Option<ProxyMetadata>,
    pub outcome: ServeOutcome,
}

struct Inner {
    entries: VecDeque<Arc<LogEntry>>,
    /// `None` means unbounded.
    capacity: Option<usize>,
}

pub struct RequestJournal {
    inner: RwLock<Inner>,
}

impl RequestJournal {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: VecDeque::new(),
                capacity,
            }),
        }
    }

    pub fn append(&self, entry: LogEntry) {
        let mut inner = self.inner.write();
        if let Some(cap) = inner.capacity {
            if cap == 0 {
                return;
            }
            while inner.entries.len() >= cap {
                inner.entries.pop_front();
            }
        }
        inner.entries.push_back(Arc::new(entry));
    }

    /// Entries in arrival order, optionally filtered by a matcher tree
    /// applied to the stored request.
    pub fn list(&self, filter: Option<&MatchTree>) -> Vec<Arc<LogEntry>> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter(|e| match filter {
                Some(tree) => tree.score(&e.request) >= 1.0,
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn find_by_mapping(&self, mapping_id: Uuid) -> Vec<Arc<LogEntry>> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .filter(|e| e.matched_mapping_id == Some(mapping_id))
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn reset(&self) {
        self.inner.write().entries.clear();
    }

    /// Change the bound; shrinking evicts oldest entries immediately.
    pub fn set_capacity(&self, capacity: Option<usize>) {
        let mut inner = self.inner.write();
        inner.capacity = capacity;
        if let Some(cap) = capacity {
            while inner.entries.len() > cap {
                inner.entries.pop_front();
            }
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.inner.read().capacity
    }
}

impl Default for RequestJournal {
    fn default() -> Self {
        Self::new(Some(DEFAULT_LOG_CAPACITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::{FieldSelector, RequestMatcher};

    fn entry(path: &str, mapping_id: Option<Uuid>) -> LogEntry {
        let request = RequestMessage::builder().path(path).build();
        let now = Utc::now();
        LogEntry {
            id: Uuid::new_v4(),
            request,
            matched_mapping_id: mapping_id,
            partial_candidates: Vec::new(),
            response: ResponseSnapshot {
                status: 200,
                headers: HeaderMultimap::new(),
                body: Bytes::new(),
            },
            timing: LogTiming {
                started: now,
                matched_at: Some(now),
                completed_at: now,
            },
            proxy: None,
            outcome: ServeOutcome::Served,
        }
    }

    #[test]
    fn append_and_count() {
        let journal = RequestJournal::default();
        journal.append(entry("/a", None));
        journal.append(entry("/b", None));
        assert_eq!(journal.count(), 2);

        journal.reset();
        assert_eq!(journal.count(), 0);
    }

    #[test]
    fn overflow_evicts_oldest_first() {
        let journal = RequestJournal::new(Some(3));
        for i in 0..5 {
            journal.append(entry(&format!("/{i}"), None));
        }
        assert_eq!(journal.count(), 3);
        let paths: Vec<_> = journal
            .list(None)
            .iter()
            .map(|e| e.request.path.clone())
            .collect();
        assert_eq!(paths, vec!["/2", "/3", "/4"]);
    }

    #[test]
    fn unbounded_journal_keeps_everything() {
        let journal = RequestJournal::new(None);
        for i in 0..2000 {
            journal.append(entry(&format!("/{i}"), None));
        }
        assert_eq!(journal.count(), 2000);
    }

    #[test]
    fn list_filters_with_matcher_tree() {
        let journal = RequestJournal::default();
        journal.append(entry("/orders", None));
        journal.append(entry("/users", None));
        journal.append(entry("/orders", None));

        let filter: MatchTree = RequestMatcher::exact(FieldSelector::Path, "/orders").into();
        assert_eq!(journal.list(Some(&filter)).len(), 2);
        assert_eq!(journal.list(None).len(), 3);
    }

    #[test]
    fn find_by_mapping_matches_winner_id() {
        let journal = RequestJournal::default();
        let id = Uuid::new_v4();
        journal.append(entry("/a", Some(id)));
        journal.append(entry("/b", None));
        journal.append(entry("/c", Some(id)));

        assert_eq!(journal.find_by_mapping(id).len(), 2);
        assert!(journal.find_by_mapping(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn shrinking_capacity_evicts_immediately() {
        let journal = RequestJournal::new(None);
        for i in 0..10 {
            journal.append(entry(&format!("/{i}"), None));
        }
        journal.set_capacity(Some(4));
        assert_eq!(journal.count(), 4);
        let first = &journal.list(None)[0];
        assert_eq!(first.request.path, "/6");
    }
}
