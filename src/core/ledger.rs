/*
Bookkeeping for one link:
  outbound: sequence numbers handed out in the current generation, which of them
            still wait for a broker confirmation, and how the rest resolved.
  inbound:  deliveries acked, forwarded downstream, or dropped.

Outbound state is reset whenever a new connection generation starts. Consumer
statistics live for the whole lifetime of the instance.
*/

use crate::core::error::LedgerError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Ack,
    Nack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub generation: u64,
    pub next_sequence: u64,
    pub pending: usize,
    pub acked: u64,
    pub nacked: u64,
}

#[derive(Debug)]
struct Outbound {
    generation: u64,
    next_sequence: u64,
    pending: BTreeMap<u64, Instant>,
    acked: u64,
    nacked: u64,
}

impl Outbound {
    fn fresh(generation: u64) -> Self {
        Outbound {
            generation,
            next_sequence: 1,
            pending: BTreeMap::new(),
            acked: 0,
            nacked: 0,
        }
    }

    fn count(&mut self, outcome: Confirmation, n: u64) {
        match outcome {
            Confirmation::Ack => self.acked += n,
            Confirmation::Nack => self.nacked += n,
        }
    }
}

#[derive(Debug, Default)]
pub struct ConsumerStats {
    acked: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl ConsumerStats {
    pub fn record_ack(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct DeliveryLedger {
    outbound: Mutex<Outbound>,
    consumer: ConsumerStats,
}

impl Default for DeliveryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryLedger {
    pub fn new() -> Self {
        DeliveryLedger {
            outbound: Mutex::new(Outbound::fresh(0)),
            consumer: ConsumerStats::default(),
        }
    }

    /// Forgets everything outbound and starts numbering at 1 again.
    /// Returns how many confirmations were still outstanding.
    pub fn reset(&self, generation: u64) -> usize {
        let mut out = self.outbound.lock();
        let abandoned = out.pending.len();
        *out = Outbound::fresh(generation);
        abandoned
    }

    pub fn next_sequence(&self) -> u64 {
        self.outbound.lock().next_sequence
    }

    /// Marks `sequence` as published and awaiting confirmation.
    pub fn record_pending(&self, sequence: u64) -> Result<(), LedgerError> {
        let mut out = self.outbound.lock();
        if sequence < out.next_sequence || sequence == 0 {
            return Err(LedgerError::SequenceReused {
                sequence,
                next: out.next_sequence,
            });
        }
        out.pending.insert(sequence, Instant::now());
        out.next_sequence = sequence + 1;
        Ok(())
    }

    /// Resolves one pending entry, returning how long it waited.
    pub fn resolve(&self, sequence: u64, outcome: Confirmation) -> Result<Duration, LedgerError> {
        let mut out = self.outbound.lock();
        let published_at = out
            .pending
            .remove(&sequence)
            .ok_or(LedgerError::NotPending(sequence))?;
        out.count(outcome, 1);
        Ok(published_at.elapsed())
    }

    /// Resolves every pending entry up to and including `sequence`.
    pub fn resolve_through(&self, sequence: u64, outcome: Confirmation) -> usize {
        let mut out = self.outbound.lock();
        let keep = out.pending.split_off(&(sequence.saturating_add(1)));
        let resolved = std::mem::replace(&mut out.pending, keep).len();
        out.count(outcome, resolved as u64);
        resolved
    }

    pub fn pending_count(&self) -> usize {
        self.outbound.lock().pending.len()
    }

    pub fn pending_sequences(&self) -> Vec<u64> {
        self.outbound.lock().pending.keys().copied().collect()
    }

    pub fn ack_count(&self) -> u64 {
        self.outbound.lock().acked
    }

    pub fn nack_count(&self) -> u64 {
        self.outbound.lock().nacked
    }

    pub fn generation(&self) -> u64 {
        self.outbound.lock().generation
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let out = self.outbound.lock();
        LedgerSnapshot {
            generation: out.generation,
            next_sequence: out.next_sequence,
            pending: out.pending.len(),
            acked: out.acked,
            nacked: out.nacked,
        }
    }

    pub fn consumer(&self) -> &ConsumerStats {
        &self.consumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publish(ledger: &DeliveryLedger, n: u64) {
        for _ in 0..n {
            let seq = ledger.next_sequence();
            ledger.record_pending(seq).unwrap();
        }
    }

    #[test]
    fn sequences_start_at_one_and_increase() {
        let ledger = DeliveryLedger::new();
        publish(&ledger, 3);
        assert_eq!(ledger.pending_sequences(), vec![1, 2, 3]);
        assert_eq!(ledger.next_sequence(), 4);
    }

    #[test]
    fn out_of_order_confirmations_resolve() {
        let ledger = DeliveryLedger::new();
        publish(&ledger, 3);

        ledger.resolve(2, Confirmation::Ack).unwrap();
        ledger.resolve(1, Confirmation::Ack).unwrap();
        ledger.resolve(3, Confirmation::Nack).unwrap();

        let snap = ledger.snapshot();
        assert_eq!(snap.pending, 0);
        assert_eq!(snap.acked, 2);
        assert_eq!(snap.nacked, 1);
    }

    #[test]
    fn unknown_or_repeated_confirmation_is_reported() {
        let ledger = DeliveryLedger::new();
        publish(&ledger, 1);
        ledger.resolve(1, Confirmation::Ack).unwrap();
        assert_eq!(
            ledger.resolve(1, Confirmation::Ack),
            Err(LedgerError::NotPending(1))
        );
        assert_eq!(ledger.ack_count(), 1);
    }

    #[test]
    fn multiple_confirmation_resolves_a_prefix() {
        let ledger = DeliveryLedger::new();
        publish(&ledger, 5);
        ledger.resolve(2, Confirmation::Ack).unwrap();

        assert_eq!(ledger.resolve_through(3, Confirmation::Ack), 2);
        assert_eq!(ledger.pending_sequences(), vec![4, 5]);
        assert_eq!(ledger.ack_count(), 3);
    }

    #[test]
    fn reused_sequence_is_rejected() {
        let ledger = DeliveryLedger::new();
        publish(&ledger, 2);
        assert_eq!(
            ledger.record_pending(2),
            Err(LedgerError::SequenceReused { sequence: 2, next: 3 })
        );
    }

    #[test]
    fn reset_starts_a_new_generation() {
        let ledger = DeliveryLedger::new();
        ledger.reset(1);
        publish(&ledger, 2);
        ledger.resolve(1, Confirmation::Ack).unwrap();
        ledger.consumer().record_ack();

        assert_eq!(ledger.reset(2), 1);
        let snap = ledger.snapshot();
        assert_eq!(snap.generation, 2);
        assert_eq!(snap.next_sequence, 1);
        assert_eq!(snap.pending + snap.acked as usize + snap.nacked as usize, 0);
        assert_eq!(ledger.consumer().acked(), 1);
    }
}
