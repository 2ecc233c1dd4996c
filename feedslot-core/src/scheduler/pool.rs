//! Slot pool bookkeeping
//!
//! Pure data structure: it decides what should happen to a request but
//! performs no I/O. The scheduler carries out the plan against the gateway
//! and then commits it here.
//!
//! Eviction order among non-position entries is `(tier, acquired_at, seq)`
//! ascending, where `seq` is a per-pool insertion counter that breaks ties
//! between entries acquired at the same instant.

use crate::core::{PriorityTier, Symbol};
use crate::state::SlotUsage;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// One occupied slot
#[derive(Debug)]
pub struct SlotEntry<H> {
    pub symbol: Symbol,
    pub tier: PriorityTier,
    pub acquired_at: SystemTime,
    pub seq: u64,
    pub handle: H,
}

impl<H> SlotEntry<H> {
    #[inline]
    fn eviction_key(&self) -> (PriorityTier, SystemTime, u64) {
        (self.tier, self.acquired_at, self.seq)
    }
}

/// What a request needs before it can be answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// Symbol already holds a slot at `current`
    AlreadyActive { current: PriorityTier },
    /// A free slot is available to this tier
    Open,
    /// Free `victim` first, then open
    Evict { victim: Symbol },
    /// No slot and nothing lower to evict
    Reject,
}

/// Fixed-capacity slot pool
///
/// `H` is whatever the owner keeps per slot: a live `FeedHandle` in the
/// scheduler, `()` in pure planning contexts.
#[derive(Debug)]
pub struct SlotPool<H> {
    capacity: usize,
    reserved: usize,
    entries: BTreeMap<Symbol, SlotEntry<H>>,
    next_seq: u64,
}

impl<H> SlotPool<H> {
    /// `reserved` slots are usable only by `Position` requests
    pub fn new(capacity: usize, reserved: usize) -> Self {
        Self {
            capacity,
            reserved: reserved.min(capacity),
            entries: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// Slots non-position requests may fill without evicting
    pub fn scanner_capacity(&self) -> usize {
        self.capacity - self.reserved
    }

    pub fn active(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, symbol: &Symbol) -> bool {
        self.entries.contains_key(symbol)
    }

    pub fn get(&self, symbol: &Symbol) -> Option<&SlotEntry<H>> {
        self.entries.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlotEntry<H>> {
        self.entries.values()
    }

    pub fn positions(&self) -> usize {
        self.entries.values().filter(|e| e.tier.is_pinned()).count()
    }

    pub fn usage(&self) -> SlotUsage {
        SlotUsage::compute(
            self.capacity,
            self.reserved,
            self.entries.values().map(|e| e.tier),
        )
    }

    /// Decide how to serve `symbol` at `tier`
    pub fn plan(&self, symbol: &Symbol, tier: PriorityTier) -> Plan {
        if let Some(entry) = self.entries.get(symbol) {
            return Plan::AlreadyActive {
                current: entry.tier,
            };
        }

        let active = self.entries.len();
        if active < self.capacity && (tier.is_pinned() || active < self.scanner_capacity()) {
            return Plan::Open;
        }

        match self.lowest_evictable() {
            Some(victim) if victim.tier < tier => Plan::Evict {
                victim: victim.symbol.clone(),
            },
            _ => Plan::Reject,
        }
    }

    /// Next entry eviction would pick, ignoring pinned entries
    pub fn lowest_evictable(&self) -> Option<&SlotEntry<H>> {
        self.entries
            .values()
            .filter(|e| !e.tier.is_pinned())
            .min_by_key(|e| e.eviction_key())
    }

    /// Occupy a slot; returns the insertion sequence number
    ///
    /// Callers must have planned `Open` (or freed a victim) first. Replacing an
    /// existing symbol drops its old entry.
    pub fn insert(&mut self, symbol: Symbol, tier: PriorityTier, acquired_at: SystemTime, handle: H) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            symbol.clone(),
            SlotEntry {
                symbol,
                tier,
                acquired_at,
                seq,
                handle,
            },
        );
        debug_assert!(self.entries.len() <= self.capacity);
        seq
    }

    /// Raise an active entry to `tier` if that is higher; returns the new tier
    pub fn raise_tier(&mut self, symbol: &Symbol, tier: PriorityTier) -> Option<PriorityTier> {
        let entry = self.entries.get_mut(symbol)?;
        entry.tier = entry.tier.max(tier);
        Some(entry.tier)
    }

    pub fn remove(&mut self, symbol: &Symbol) -> Option<SlotEntry<H>> {
        self.entries.remove(symbol)
    }

    /// Empty the pool, oldest insertion first
    pub fn drain(&mut self) -> Vec<SlotEntry<H>> {
        let mut all: Vec<SlotEntry<H>> = std::mem::take(&mut self.entries).into_values().collect();
        all.sort_by_key(|e| e.seq);
        all
    }

    /// Non-position entries with no tick for longer than `max_idle`
    ///
    /// Idle time runs from the later of the last tick and the acquisition,
    /// so a fresh subscription gets the full window before its first tick.
    pub fn idle<F>(&self, now: SystemTime, max_idle: Duration, last_tick: F) -> Vec<Symbol>
    where
        F: Fn(&Symbol) -> Option<SystemTime>,
    {
        self.entries
            .values()
            .filter(|e| !e.tier.is_pinned())
            .filter(|e| {
                let since = match last_tick(&e.symbol) {
                    Some(at) => at.max(e.acquired_at),
                    None => e.acquired_at,
                };
                now.duration_since(since)
                    .map(|idle| idle > max_idle)
                    .unwrap_or(false)
            })
            .map(|e| e.symbol.clone())
            .collect()
    }
}
