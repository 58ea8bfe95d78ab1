use dashmap::DashSet;

use patan_core::request::{Fingerprint, Request};

/// Tracks seen request fingerprints and decides admission to the queue.
///
/// The set grows monotonically for the lifetime of one crawl run; there is no
/// removal. `seen` is an atomic check-and-insert, so concurrent callers can
/// never both admit the same fingerprint.
#[derive(Debug, Default)]
pub struct DuplicateFilter {
    seen: DashSet<Fingerprint>,
}

impl DuplicateFilter {
    /// Create a new empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the request's fingerprint and report whether it was already
    /// known. The first encounter returns false; every later encounter with
    /// the same `(method, url)` returns true.
    ///
    /// Requests flagged `dont_filter` are neither recorded nor reported seen.
    pub fn seen(&self, request: &Request) -> bool {
        if request.dont_filter {
            return false;
        }
        !self.seen.insert(request.fingerprint())
    }

    /// Number of distinct fingerprints recorded so far
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no fingerprint has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
