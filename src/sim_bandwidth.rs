use hashbrown::HashMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::sim_interface::{LinkRate, NodeId};

/// One ledger row, as listed and checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub base: NodeId,
    pub peer: NodeId,
    pub rate: LinkRate,
}

/// Directed bandwidth accounting between peers.
///
/// An upload from `a` to `b` is booked under base `a`, a download by `b`
/// from `a` under base `b`. A row whose rates are both zero is dropped, and
/// a base with no rows is dropped with it.
#[derive(Debug, Default, Clone)]
pub struct BandwidthLedger {
    rows: HashMap<NodeId, HashMap<NodeId, LinkRate>>,
}

impl BandwidthLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_upload(&mut self, src: NodeId, dest: NodeId, rate: u64) {
        self.rows.entry(src).or_default().entry(dest).or_default().upload += rate;
    }

    pub fn release_upload(&mut self, src: NodeId, dest: NodeId, rate: u64) {
        self.adjust(src, dest, |r| r.upload = r.upload.saturating_sub(rate));
    }

    pub fn use_download(&mut self, src: NodeId, dest: NodeId, rate: u64) {
        self.rows.entry(dest).or_default().entry(src).or_default().download += rate;
    }

    pub fn release_download(&mut self, src: NodeId, dest: NodeId, rate: u64) {
        self.adjust(dest, src, |r| r.download = r.download.saturating_sub(rate));
    }

    fn adjust(&mut self, base: NodeId, peer: NodeId, f: impl FnOnce(&mut LinkRate)) {
        let Some(row) = self.rows.get_mut(&base) else {
            debug!("ledger: release on {} with no entries", base);
            return;
        };
        if let Some(rate) = row.get_mut(&peer) {
            f(rate);
            if rate.is_idle() {
                row.remove(&peer);
            }
        }
        if row.is_empty() {
            self.rows.remove(&base);
        }
    }

    pub fn total_upload(&self, node: NodeId) -> u64 {
        self.rows
            .get(&node)
            .map(|row| row.values().map(|r| r.upload).sum())
            .unwrap_or(0)
    }

    pub fn total_download(&self, node: NodeId) -> u64 {
        self.rows
            .get(&node)
            .map(|row| row.values().map(|r| r.download).sum())
            .unwrap_or(0)
    }

    /// Rates currently booked between `base` and `peer`, seen from `base`.
    pub fn current_rate(&self, base: NodeId, peer: NodeId) -> Option<LinkRate> {
        self.rows.get(&base).and_then(|row| row.get(&peer)).copied()
    }

    /// Peers `node` is uploading to, sorted.
    pub fn uploads_of(&self, node: NodeId) -> Vec<NodeId> {
        self.peers_where(node, |r| r.upload > 0)
    }

    /// Peers `node` is downloading from, sorted.
    pub fn downloads_of(&self, node: NodeId) -> Vec<NodeId> {
        self.peers_where(node, |r| r.download > 0)
    }

    fn peers_where(&self, node: NodeId, keep: impl Fn(&LinkRate) -> bool) -> Vec<NodeId> {
        let mut peers: Vec<NodeId> = self
            .rows
            .get(&node)
            .map(|row| {
                row.iter()
                    .filter(|(_, r)| keep(r))
                    .map(|(p, _)| *p)
                    .collect()
            })
            .unwrap_or_default();
        peers.sort();
        peers
    }

    /// Forget `node`: its own rows, and every other base's row naming it.
    pub fn remove(&mut self, node: NodeId) {
        self.rows.remove(&node);
        self.rows.retain(|_, row| {
            row.remove(&node);
            !row.is_empty()
        });
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows, sorted by (base, peer).
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let mut out: Vec<LedgerEntry> = self
            .rows
            .iter()
            .flat_map(|(base, row)| {
                row.iter().map(move |(peer, rate)| LedgerEntry {
                    base: *base,
                    peer: *peer,
                    rate: *rate,
                })
            })
            .collect();
        out.sort_by_key(|e| (e.base, e.peer));
        out
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    pub fn save(&self) -> Vec<LedgerEntry> {
        self.entries()
    }

    pub fn load(&mut self, entries: &[LedgerEntry]) {
        self.rows.clear();
        for e in entries.iter().filter(|e| !e.rate.is_idle()) {
            self.rows.entry(e.base).or_default().insert(e.peer, e.rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const A: NodeId = NodeId::new(1, 10);
    const B: NodeId = NodeId::new(2, 20);
    const C: NodeId = NodeId::new(3, 30);

    #[test]
    fn test_upload_accumulates_and_clears() {
        let mut ledger = BandwidthLedger::new();
        ledger.use_upload(A, B, 100);
        assert_eq!(ledger.total_upload(A), 100);
        ledger.use_upload(A, B, 50);
        assert_eq!(ledger.total_upload(A), 150);
        ledger.release_upload(A, B, 150);
        assert_eq!(ledger.total_upload(A), 0);
        assert!(ledger.entries().is_empty());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_download_keyed_by_destination() {
        let mut ledger = BandwidthLedger::new();
        ledger.use_download(A, B, 40);
        assert_eq!(ledger.total_download(B), 40);
        assert_eq!(ledger.total_download(A), 0);
        assert_eq!(ledger.downloads_of(B), vec![A]);
        assert_eq!(
            ledger.current_rate(B, A),
            Some(LinkRate { upload: 0, download: 40 })
        );
    }

    #[test]
    fn test_row_survives_while_other_direction_active() {
        let mut ledger = BandwidthLedger::new();
        ledger.use_upload(A, B, 10);
        // B uploading to A books a download under A
        ledger.use_download(B, A, 5);
        ledger.release_upload(A, B, 10);
        assert_eq!(
            ledger.current_rate(A, B),
            Some(LinkRate { upload: 0, download: 5 })
        );
        ledger.release_download(B, A, 5);
        assert_eq!(ledger.current_rate(A, B), None);
    }

    #[test]
    fn test_over_release_saturates() {
        let mut ledger = BandwidthLedger::new();
        ledger.use_upload(A, B, 10);
        ledger.release_upload(A, B, 25);
        assert_eq!(ledger.total_upload(A), 0);
        assert!(ledger.is_empty());
        // release with nothing booked is a no-op
        ledger.release_upload(C, A, 5);
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_listings_sorted() {
        let mut ledger = BandwidthLedger::new();
        ledger.use_upload(A, C, 1);
        ledger.use_upload(A, B, 1);
        assert_eq!(ledger.uploads_of(A), vec![B, C]);
        let e = ledger.entries();
        assert_eq!(e[0].peer, B);
        assert_eq!(e[1].peer, C);
    }

    #[test]
    fn test_remove_and_reload() {
        let mut ledger = BandwidthLedger::new();
        ledger.use_upload(A, B, 3);
        ledger.use_upload(C, B, 4);
        let saved = ledger.save();
        ledger.remove(A);
        assert_eq!(ledger.total_upload(A), 0);
        assert_eq!(ledger.total_upload(C), 4);

        let mut restored = BandwidthLedger::new();
        restored.load(&saved);
        assert_eq!(restored.entries(), saved);
    }

    #[test]
    fn test_remove_drops_rows_naming_the_node() {
        let mut ledger = BandwidthLedger::new();
        // A streams to B and C, B streams back to A
        ledger.use_upload(A, B, 10);
        ledger.use_download(A, B, 10);
        ledger.use_upload(A, C, 7);
        ledger.use_download(A, C, 7);
        ledger.use_upload(B, A, 5);
        ledger.use_download(B, A, 5);
        ledger.use_upload(B, C, 2);

        ledger.remove(A);
        assert_eq!(ledger.total_download(B), 0);
        assert_eq!(ledger.total_upload(B), 2);
        assert_eq!(ledger.total_download(C), 0);
        assert_eq!(ledger.uploads_of(B), vec![C]);
        // C's only row named A, so C is gone as a base
        assert!(ledger.entries().iter().all(|e| e.base != C));
        assert!(ledger.entries().iter().all(|e| e.peer != A && e.base != A));
    }

    proptest! {
        #[test]
        fn prop_use_then_release_is_identity(
            pre in proptest::collection::vec((0i64..4, 0i64..4, 1u64..100), 0..10),
            rate in 1u64..1000,
        ) {
            let mut ledger = BandwidthLedger::new();
            for (s, d, r) in &pre {
                ledger.use_upload(NodeId::new(*s, 0), NodeId::new(*d, 0), *r);
            }
            let before_total = ledger.total_upload(A);
            let before_entries = ledger.entries();

            ledger.use_upload(A, B, rate);
            ledger.release_upload(A, B, rate);

            prop_assert_eq!(ledger.total_upload(A), before_total);
            prop_assert_eq!(ledger.entries(), before_entries);
        }
    }
}
