//! Ephemeral presence state (§4.6): per-document, per-client entries that
//! expire on their own and are never persisted to the document store.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use dashmap::DashMap;
use sync_common::{WriteKey, candidate_wins};
use sync_protocol::AwarenessEntryWire;

/// One client's last-known presence payload for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct AwarenessEntry {
    pub client_id: String,
    /// `None` means the client left (§4.6 "leave").
    pub state: Option<serde_json::Value>,
    pub clock: u64,
}

impl AwarenessEntry {
    fn key(&self) -> WriteKey<'_> {
        // The writer of an awareness entry is the client the entry is about,
        // so comparing by clock alone (with the client id as a degenerate
        // tie-break against itself) collapses to "strictly greater clock
        // replaces; equal clock is a no-op" — re-sending the same presence
        // update twice is idempotent, matching the common presence-protocol
        // convention of a per-client monotonic counter.
        WriteKey {
            timestamp: 0,
            clock: self.clock,
            writer_id: &self.client_id,
        }
    }

    #[must_use]
    pub fn to_wire(&self) -> AwarenessEntryWire {
        AwarenessEntryWire {
            client_id: self.client_id.clone(),
            state: self.state.clone(),
            clock: self.clock,
        }
    }
}

/// Default time after which a client's presence is dropped if no update
/// refreshes it (§6 `awareness.entryTimeoutMs`).
pub const DEFAULT_ENTRY_TIMEOUT_MS: i64 = 30_000;

struct DocumentAwareness {
    entries: Mutex<HashMap<String, (AwarenessEntry, i64)>>,
}

impl DocumentAwareness {
    fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (AwarenessEntry, i64)>> {
        self.entries.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Default period of the background expiry sweep (§6 `awareness sweep interval`).
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5_000;

/// Process-wide presence store, one [`DocumentAwareness`] per document,
/// created lazily on first touch (§4.6).
pub struct AwarenessStore {
    documents: DashMap<String, DocumentAwareness>,
    entry_timeout_ms: i64,
    sweep_interval_ms: u64,
}

impl Default for AwarenessStore {
    fn default() -> Self {
        Self::new(DEFAULT_ENTRY_TIMEOUT_MS, DEFAULT_SWEEP_INTERVAL_MS)
    }
}

impl AwarenessStore {
    #[must_use]
    pub fn new(entry_timeout_ms: i64, sweep_interval_ms: u64) -> Self {
        Self {
            documents: DashMap::new(),
            entry_timeout_ms: if entry_timeout_ms > 0 { entry_timeout_ms } else { DEFAULT_ENTRY_TIMEOUT_MS },
            sweep_interval_ms: if sweep_interval_ms > 0 { sweep_interval_ms } else { DEFAULT_SWEEP_INTERVAL_MS },
        }
    }

    /// Merge an incoming presence update by LWW-on-clock (§4.6). Returns
    /// `Some(entry)` if it actually changed anything worth broadcasting —
    /// `None` for a stale or duplicate update.
    ///
    /// A `state: None` candidate that wins the merge removes the entry
    /// entirely (§3 "Awareness entry" lifecycle: "removed when state is
    /// null") rather than leaving a tombstone behind — a client that
    /// reconnects and restarts its clock from a low value must not find a
    /// stale leave record blocking its first update as "behind".
    pub fn update(
        &self,
        doc_id: &str,
        client_id: &str,
        state: Option<serde_json::Value>,
        clock: u64,
        now_ms: i64,
    ) -> Option<AwarenessEntry> {
        let candidate = AwarenessEntry { client_id: client_id.to_string(), state, clock };
        let doc = self.documents.entry(doc_id.to_string()).or_insert_with(DocumentAwareness::new);
        let mut entries = doc.lock();
        let existing_key = entries.get(client_id).map(|(entry, _)| entry.key());
        if !candidate_wins(existing_key, candidate.key()) {
            return None;
        }
        if candidate.state.is_none() {
            entries.remove(client_id);
        } else {
            entries.insert(client_id.to_string(), (candidate.clone(), now_ms));
        }
        Some(candidate)
    }

    /// All live (non-expired) entries for a document, e.g. for an initial
    /// `awareness_state` reply on subscribe (§4.6).
    #[must_use]
    pub fn snapshot(&self, doc_id: &str, now_ms: i64) -> Vec<AwarenessEntry> {
        let Some(doc) = self.documents.get(doc_id) else {
            return Vec::new();
        };
        let timeout = self.entry_timeout_ms;
        doc.lock()
            .values()
            .filter(|(_, last_seen)| now_ms.saturating_sub(*last_seen) < timeout)
            .map(|(entry, _)| entry.clone())
            .collect()
    }

    /// Drop every entry for `client_id` across all documents, e.g. on
    /// connection close (§4.6 "onConnectionClosed"). Returns the
    /// `(doc_id, AwarenessEntry-with-state=None)` leave notifications to
    /// broadcast, one per document the client had presence in.
    pub fn remove_client(&self, client_id: &str) -> Vec<(String, AwarenessEntry)> {
        let mut removed = Vec::new();
        for doc in self.documents.iter() {
            let mut entries = doc.lock();
            if let Some((mut entry, _)) = entries.remove(client_id) {
                entry.state = None;
                entry.clock += 1;
                removed.push((doc.key().clone(), entry));
            }
        }
        removed
    }

    /// Sweep every document for entries older than the configured timeout,
    /// synthesizing a leave notification for each (§4.6 periodic expiry).
    pub fn sweep_expired(&self, now_ms: i64) -> Vec<(String, AwarenessEntry)> {
        let timeout = self.entry_timeout_ms;
        let mut expired = Vec::new();
        for doc in self.documents.iter() {
            let mut entries = doc.lock();
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, (_, last_seen))| now_ms.saturating_sub(*last_seen) >= timeout)
                .map(|(client_id, _)| client_id.clone())
                .collect();
            for client_id in stale {
                if let Some((mut entry, _)) = entries.remove(&client_id) {
                    entry.state = None;
                    entry.clock += 1;
                    expired.push((doc.key().clone(), entry));
                }
            }
        }
        expired
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_with_higher_clock_wins() {
        let store = AwarenessStore::new(30_000, 5_000);
        let first = store.update("doc-1", "c1", Some(serde_json::json!({"x": 1})), 1, 0);
        assert!(first.is_some());
        let second = store.update("doc-1", "c1", Some(serde_json::json!({"x": 2})), 2, 10);
        assert!(second.is_some());
        assert_eq!(store.snapshot("doc-1", 10).len(), 1);
        assert_eq!(store.snapshot("doc-1", 10)[0].clock, 2);
    }

    #[test]
    fn stale_clock_update_is_a_no_op() {
        let store = AwarenessStore::new(30_000, 5_000);
        store.update("doc-1", "c1", Some(serde_json::json!({"x": 2})), 5, 0);
        let stale = store.update("doc-1", "c1", Some(serde_json::json!({"x": 1})), 3, 10);
        assert!(stale.is_none());
        assert_eq!(store.snapshot("doc-1", 10)[0].clock, 5);
    }

    #[test]
    fn equal_clock_resend_is_a_no_op() {
        let store = AwarenessStore::new(30_000, 5_000);
        store.update("doc-1", "c1", Some(serde_json::json!({"x": 1})), 1, 0);
        let repeat = store.update("doc-1", "c1", Some(serde_json::json!({"x": 1})), 1, 10);
        assert!(repeat.is_none());
    }

    #[test]
    fn entries_expire_after_timeout() {
        let store = AwarenessStore::new(1000, 5_000);
        store.update("doc-1", "c1", Some(serde_json::json!({})), 1, 0);
        assert_eq!(store.snapshot("doc-1", 500).len(), 1);
        assert_eq!(store.snapshot("doc-1", 2000).len(), 0);
    }

    #[test]
    fn sweep_expired_emits_leave_notifications() {
        let store = AwarenessStore::new(1000, 5_000);
        store.update("doc-1", "c1", Some(serde_json::json!({})), 1, 0);
        let expired = store.sweep_expired(2000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "doc-1");
        assert!(expired[0].1.state.is_none());
    }

    #[test]
    fn explicit_leave_clears_the_entry_so_a_restarted_clock_is_not_stale() {
        let store = AwarenessStore::new(30_000, 5_000);
        store.update("doc-1", "c1", Some(serde_json::json!({"x": 1})), 5, 0);
        let left = store.update("doc-1", "c1", None, 6, 10);
        assert!(left.is_some());
        assert!(store.snapshot("doc-1", 10).is_empty());

        // Reconnect: a fresh session with its own clock starting at 1 must
        // not be rejected as stale against the old clock=6 leave.
        let rejoined = store.update("doc-1", "c1", Some(serde_json::json!({"x": 2})), 1, 20);
        assert!(rejoined.is_some());
        assert_eq!(store.snapshot("doc-1", 20).len(), 1);
    }

    #[test]
    fn remove_client_clears_all_documents_and_bumps_clock() {
        let store = AwarenessStore::new(30_000, 5_000);
        store.update("doc-1", "c1", Some(serde_json::json!({})), 3, 0);
        store.update("doc-2", "c1", Some(serde_json::json!({})), 7, 0);
        let mut left = store.remove_client("c1");
        left.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(left.len(), 2);
        assert!(left[0].1.state.is_none());
        assert_eq!(left[0].1.clock, 4);
        assert_eq!(left[1].1.clock, 8);
        assert!(store.snapshot("doc-1", 0).is_empty());
    }
}
