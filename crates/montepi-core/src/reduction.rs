//! Sharded, overflow-safe result aggregation.
//!
//! WGSL has no 64-bit atomics, so every counter is a `low`/`high` pair of
//! 32-bit words. An add to `low` that wraps (`old + delta < old`) carries one
//! into `high`. Each atomic add observes a distinct `old`, so exactly one
//! writer sees the wrap for any given crossing of 2^32 and the carry is never
//! lost or duplicated once all writers have retired. Readers that race with
//! writers may briefly observe `low` wrapped before `high` is bumped; the host
//! only reads after the dispatch has retired.
//!
//! The carry rule requires `delta < 2^32` per add. The group-level reduction
//! guarantees it: a group adds at most `256 * MAX_BATCH_SIZE * 8 = 2^23`.

use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::params::SHARD_COUNT;

/// One shard of the result buffer, as laid out on the device.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Slot {
    /// Low word of the inside count.
    pub inside_low: u32,
    /// High word of the inside count.
    pub inside_high: u32,
    /// Low word of the total count.
    pub total_low: u32,
    /// High word of the total count.
    pub total_high: u32,
}

impl Slot {
    /// Inside count as a 64-bit value.
    pub fn inside(&self) -> u64 {
        combine(self.inside_low, self.inside_high)
    }

    /// Total count as a 64-bit value.
    pub fn total(&self) -> u64 {
        combine(self.total_low, self.total_high)
    }

    /// Slot holding the given 64-bit counts.
    pub fn from_counts(inside: u64, total: u64) -> Self {
        Self {
            inside_low: inside as u32,
            inside_high: (inside >> 32) as u32,
            total_low: total as u32,
            total_high: (total >> 32) as u32,
        }
    }
}

#[inline]
fn combine(low: u32, high: u32) -> u64 {
    (low as u64) | ((high as u64) << 32)
}

/// Inside/total sample counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    /// Samples that fell inside the unit quarter circle.
    pub inside: u64,
    /// Samples drawn.
    pub total: u64,
}

impl Counts {
    /// Create counts.
    pub fn new(inside: u64, total: u64) -> Self {
        Self { inside, total }
    }

    /// Sum every shard of a result buffer image.
    pub fn from_slots(slots: &[Slot]) -> Self {
        slots.iter().fold(Self::default(), |acc, slot| Self {
            inside: acc.inside + slot.inside(),
            total: acc.total + slot.total(),
        })
    }

    /// `4 * inside / total`, or `None` when nothing was sampled.
    pub fn pi_estimate(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(4.0 * self.inside as f64 / self.total as f64)
        }
    }

    /// `|estimate - pi|`, or `None` when nothing was sampled.
    pub fn empirical_error(&self) -> Option<f64> {
        self.pi_estimate()
            .map(|pi| (pi - std::f64::consts::PI).abs())
    }

    /// Counts accumulated since `baseline`, or `None` if `self` is behind it.
    pub fn since(&self, baseline: &Counts) -> Option<Counts> {
        Some(Counts {
            inside: self.inside.checked_sub(baseline.inside)?,
            total: self.total.checked_sub(baseline.total)?,
        })
    }

    /// Add another set of counts.
    pub fn accumulate(&mut self, other: Counts) {
        self.inside += other.inside;
        self.total += other.total;
    }
}

/// How a group combines its lanes' partial counts before the global add.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionStrategy {
    /// Barrier-synchronized shared-memory tree reduction.
    Workgroup,
    /// Hardware subgroup reduction, then a small shared-memory combine.
    Subgroup,
}

impl ReductionStrategy {
    /// Short name for logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReductionStrategy::Workgroup => "workgroup",
            ReductionStrategy::Subgroup => "subgroup",
        }
    }
}

impl std::fmt::Display for ReductionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested reduction strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReductionPreference {
    /// Subgroup when the device supports it, workgroup otherwise.
    #[default]
    Auto,
    /// Always the shared-memory path.
    Workgroup,
    /// Require subgroup support.
    Subgroup,
}

impl std::str::FromStr for ReductionPreference {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "workgroup" | "shared" => Ok(Self::Workgroup),
            "subgroup" => Ok(Self::Subgroup),
            _ => Err(format!(
                "Unknown reduction '{}'. Valid options: auto, workgroup, subgroup",
                s
            )),
        }
    }
}

/// Shard a group's representative writes to.
#[inline]
pub fn shard_for_group(group_id: u32) -> usize {
    (group_id % SHARD_COUNT) as usize
}

/// Atomic counterpart of [`Slot`].
#[derive(Debug, Default)]
pub struct AtomicSlot {
    inside_low: AtomicU32,
    inside_high: AtomicU32,
    total_low: AtomicU32,
    total_high: AtomicU32,
}

impl AtomicSlot {
    /// Add a group's combined counts with carry-on-wrap.
    pub fn add(&self, inside: u32, total: u32) {
        add_with_carry(&self.inside_low, &self.inside_high, inside);
        add_with_carry(&self.total_low, &self.total_high, total);
    }

    fn load(&self) -> Slot {
        Slot {
            inside_low: self.inside_low.load(Ordering::Acquire),
            inside_high: self.inside_high.load(Ordering::Acquire),
            total_low: self.total_low.load(Ordering::Acquire),
            total_high: self.total_high.load(Ordering::Acquire),
        }
    }

    fn store(&self, slot: Slot) {
        self.inside_low.store(slot.inside_low, Ordering::Release);
        self.inside_high.store(slot.inside_high, Ordering::Release);
        self.total_low.store(slot.total_low, Ordering::Release);
        self.total_high.store(slot.total_high, Ordering::Release);
    }
}

#[inline]
fn add_with_carry(low: &AtomicU32, high: &AtomicU32, delta: u32) {
    let old = low.fetch_add(delta, Ordering::AcqRel);
    if old.wrapping_add(delta) < old {
        high.fetch_add(1, Ordering::AcqRel);
    }
}

/// Host-side sharded result buffer with the same add semantics as the device.
#[derive(Debug)]
pub struct ShardedCounter {
    slots: Vec<AtomicSlot>,
}

impl Default for ShardedCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardedCounter {
    /// Zeroed counter with `SHARD_COUNT` slots.
    pub fn new() -> Self {
        Self {
            slots: (0..SHARD_COUNT).map(|_| AtomicSlot::default()).collect(),
        }
    }

    /// Counter preloaded from a result buffer image.
    pub fn from_slots(slots: &[Slot]) -> Self {
        let counter = Self::new();
        for (atomic, slot) in counter.slots.iter().zip(slots) {
            atomic.store(*slot);
        }
        counter
    }

    /// Add a group's counts to shard `shard`.
    pub fn add(&self, shard: usize, inside: u32, total: u32) {
        self.slots[shard % self.slots.len()].add(inside, total);
    }

    /// Copy of every shard.
    pub fn snapshot(&self) -> Vec<Slot> {
        self.slots.iter().map(AtomicSlot::load).collect()
    }

    /// Sum of every shard.
    pub fn counts(&self) -> Counts {
        Counts::from_slots(&self.snapshot())
    }

    /// Zero every shard.
    pub fn clear(&self) {
        for slot in &self.slots {
            slot.store(Slot::default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_slot_layout() {
        assert_eq!(std::mem::size_of::<Slot>(), 16);
        assert_eq!(
            std::mem::size_of::<Slot>() * SHARD_COUNT as usize,
            16 * 1024
        );
    }

    #[test]
    fn test_slot_combine() {
        let slot = Slot::from_counts(0x1_0000_0005, 0x2_FFFF_FFFF);
        assert_eq!(slot.inside_low, 5);
        assert_eq!(slot.inside_high, 1);
        assert_eq!(slot.inside(), 0x1_0000_0005);
        assert_eq!(slot.total(), 0x2_FFFF_FFFF);
    }

    #[test]
    fn test_add_below_wrap_boundary() {
        let start = Slot::from_counts(u32::MAX as u64 - 100, u32::MAX as u64 - 100);
        let counter = ShardedCounter::from_slots(&[start]);
        counter.add(0, 100, 100);

        let slot = counter.snapshot()[0];
        assert_eq!(slot.inside_low, u32::MAX);
        assert_eq!(slot.inside_high, 0);
        assert_eq!(slot.inside(), u32::MAX as u64);
    }

    #[test]
    fn test_add_across_wrap_boundary() {
        let start = Slot::from_counts(u32::MAX as u64 - 10, u32::MAX as u64 - 10);
        let counter = ShardedCounter::from_slots(&[start]);
        counter.add(0, 11, 1000);

        let slot = counter.snapshot()[0];
        assert_eq!(slot.inside_low, 0);
        assert_eq!(slot.inside_high, 1);
        assert_eq!(slot.inside(), u32::MAX as u64 + 1);
        assert_eq!(slot.total(), u32::MAX as u64 - 10 + 1000);
        assert_eq!(slot.total_high, 1);
    }

    #[test]
    fn test_add_with_existing_high_word() {
        let start = Slot::from_counts(0x7_FFFF_FFF0, 0);
        let counter = ShardedCounter::from_slots(&[start]);
        counter.add(0, 0x20, 0);
        assert_eq!(counter.counts().inside, 0x8_0000_0010);
    }

    #[test]
    fn test_concurrent_adds_carry_exactly() {
        // Start just below the boundary so many threads race across it.
        let start = Slot::from_counts(u32::MAX as u64 - 5_000, 0);
        let counter = Arc::new(ShardedCounter::from_slots(&[start]));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        counter.add(0, 3, 7);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let counts = counter.counts();
        assert_eq!(counts.inside, u32::MAX as u64 - 5_000 + 8 * 10_000 * 3);
        assert_eq!(counts.total, 8 * 10_000 * 7);
    }

    #[test]
    fn test_counts_sum_and_clear() {
        let counter = ShardedCounter::new();
        counter.add(0, 1, 2);
        counter.add(1023, 3, 4);
        counter.add(1024, 5, 6); // wraps to shard 0
        assert_eq!(counter.counts(), Counts::new(9, 12));
        assert_eq!(counter.snapshot()[0], Slot::from_counts(6, 8));

        counter.clear();
        assert_eq!(counter.counts(), Counts::default());
    }

    #[test]
    fn test_counts_since_and_estimate() {
        let base = Counts::new(10, 20);
        let now = Counts::new(85, 120);
        let delta = now.since(&base).unwrap();
        assert_eq!(delta, Counts::new(75, 100));
        assert_eq!(delta.pi_estimate(), Some(3.0));
        assert!(base.since(&now).is_none());
        assert!(Counts::default().pi_estimate().is_none());
    }

    #[test]
    fn test_shard_for_group() {
        assert_eq!(shard_for_group(0), 0);
        assert_eq!(shard_for_group(1025), 1);
    }

    #[test]
    fn test_reduction_preference_parse() {
        assert_eq!("auto".parse::<ReductionPreference>(), Ok(ReductionPreference::Auto));
        assert_eq!(
            "Subgroup".parse::<ReductionPreference>(),
            Ok(ReductionPreference::Subgroup)
        );
        assert!("warp".parse::<ReductionPreference>().is_err());
    }
}
