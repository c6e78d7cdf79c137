//! Host mirror of the device kernel.
//!
//! [`CpuSampler`] runs [`sample_lane`] for every lane of a dispatch, combines
//! each group's partials the way the selected WGSL variant does, and performs
//! one carry-on-wrap add per group into the sharded counter. Groups run in
//! parallel on the rayon pool and race on the shared atomics exactly like
//! device workgroups do.

use rayon::prelude::*;

use crate::error::{MontePiError, Result};
use crate::kernel::{sample_lane, LanePartial};
use crate::params::{validate_batch_size, DispatchGeometry, SimParams, VIZ_CAPACITY, WORKGROUP_SIZE};
use crate::reduction::{shard_for_group, Counts, ReductionStrategy, ShardedCounter, Slot};
use crate::rng::RngStateStore;
use crate::viz::VisualizationBuffers;

const GROUP: usize = WORKGROUP_SIZE as usize;

/// Subgroup width assumed when none is configured.
pub const DEFAULT_SUBGROUP_WIDTH: u32 = 32;

/// Group-level result of one dispatch.
struct GroupOutcome {
    group_id: u32,
    inside: u32,
    total: u32,
    viz: Vec<Option<(f32, f32)>>,
}

/// CPU execution of the sampling kernel with both reduction strategies.
pub struct CpuSampler {
    geometry: DispatchGeometry,
    rng: RngStateStore,
    results: ShardedCounter,
    viz: VisualizationBuffers,
    subgroup_width: u32,
}

impl CpuSampler {
    /// Create a sampler over an existing generator store.
    pub fn new(geometry: DispatchGeometry, rng: RngStateStore) -> Result<Self> {
        geometry.validate()?;
        if rng.lane_count() != geometry.lane_count() {
            return Err(MontePiError::InvalidParameter(format!(
                "RNG store has {} lanes but the geometry dispatches {}",
                rng.lane_count(),
                geometry.lane_count()
            )));
        }
        Ok(Self {
            viz: VisualizationBuffers::new(geometry.lane_count()),
            geometry,
            rng,
            results: ShardedCounter::new(),
            subgroup_width: DEFAULT_SUBGROUP_WIDTH,
        })
    }

    /// Create a sampler with a reproducible store derived from `seed`.
    pub fn seeded(geometry: DispatchGeometry, seed: u32) -> Result<Self> {
        geometry.validate()?;
        Self::new(geometry, RngStateStore::from_seed(seed, geometry.lane_count()))
    }

    /// Emulate a device whose subgroups are `width` lanes wide.
    pub fn with_subgroup_width(mut self, width: u32) -> Result<Self> {
        if !width.is_power_of_two() || !(4..=WORKGROUP_SIZE).contains(&width) {
            return Err(MontePiError::InvalidParameter(format!(
                "subgroup width must be a power of two in 4..={}, got {}",
                WORKGROUP_SIZE, width
            )));
        }
        self.subgroup_width = width;
        Ok(self)
    }

    /// Run one dispatch.
    pub fn dispatch(&mut self, params: &SimParams, strategy: ReductionStrategy) -> Result<()> {
        let batch_size = validate_batch_size(params.batch_size)?;
        let subgroup_width = self.subgroup_width as usize;
        let results = &self.results;

        let outcomes: Vec<GroupOutcome> = self
            .rng
            .lanes_mut()
            .par_chunks_mut(GROUP)
            .enumerate()
            .map(|(group, lanes)| {
                let group_id = group as u32;
                let mut inside = [0u32; GROUP];
                let mut total = [0u32; GROUP];
                let first_lane = group_id * WORKGROUP_SIZE;
                let mut viz = Vec::new();

                for (i, lane) in lanes.iter_mut().enumerate() {
                    let LanePartial {
                        inside: lane_inside,
                        total: lane_total,
                        viz_point,
                    } = sample_lane(lane, batch_size);
                    inside[i] = lane_inside;
                    total[i] = lane_total;
                    if first_lane + (i as u32) < VIZ_CAPACITY {
                        viz.push(viz_point);
                    }
                }

                let (inside, total) = match strategy {
                    ReductionStrategy::Workgroup => (tree_reduce(&mut inside), tree_reduce(&mut total)),
                    ReductionStrategy::Subgroup => (
                        subgroup_reduce(&inside, subgroup_width),
                        subgroup_reduce(&total, subgroup_width),
                    ),
                };
                results.add(shard_for_group(group_id), inside, total);

                GroupOutcome {
                    group_id,
                    inside,
                    total,
                    viz,
                }
            })
            .collect();

        for outcome in outcomes {
            let first_lane = outcome.group_id * WORKGROUP_SIZE;
            for (i, point) in outcome.viz.into_iter().enumerate() {
                if let Some(point) = point {
                    self.viz.write(first_lane + i as u32, point);
                }
            }
            tracing::trace!(
                group = outcome.group_id,
                inside = outcome.inside,
                total = outcome.total,
                "Group reduced"
            );
        }

        tracing::debug!(
            frame = params.global_time,
            batch_size,
            strategy = %strategy,
            "CPU dispatch complete"
        );
        Ok(())
    }

    /// Sum of every shard.
    pub fn counts(&self) -> Counts {
        self.results.counts()
    }

    /// Per-shard image of the result buffer.
    pub fn snapshot(&self) -> Vec<Slot> {
        self.results.snapshot()
    }

    /// Zero the result buffer.
    pub fn clear(&self) {
        self.results.clear();
    }

    /// Replace the generator state; the lane count must not change.
    pub fn reseed(&mut self, rng: RngStateStore) -> Result<()> {
        if rng.lane_count() != self.geometry.lane_count() {
            return Err(MontePiError::InvalidParameter(format!(
                "reseed needs {} lanes, got {}",
                self.geometry.lane_count(),
                rng.lane_count()
            )));
        }
        self.rng = rng;
        Ok(())
    }

    /// Current generator state (savepoint).
    pub fn rng(&self) -> &RngStateStore {
        &self.rng
    }

    /// Visualization points from the most recent dispatch.
    pub fn viz(&self) -> &VisualizationBuffers {
        &self.viz
    }

    /// Dispatch geometry.
    pub fn geometry(&self) -> DispatchGeometry {
        self.geometry
    }
}

/// Shared-memory tree reduction: halve the active range each step.
fn tree_reduce(shared: &mut [u32; GROUP]) -> u32 {
    let mut stride = GROUP / 2;
    while stride > 0 {
        for i in 0..stride {
            shared[i] += shared[i + stride];
        }
        stride /= 2;
    }
    shared[0]
}

/// Per-subgroup sums written by each leader, then combined by lane 0.
fn subgroup_reduce(values: &[u32; GROUP], width: usize) -> u32 {
    let leaders: Vec<u32> = values.chunks(width).map(|sg| sg.iter().sum()).collect();
    leaders.iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reducers_agree() {
        let mut values = [0u32; GROUP];
        for (i, v) in values.iter_mut().enumerate() {
            *v = (i as u32).wrapping_mul(2_654_435_761) % 32768;
        }
        let expected: u32 = values.iter().sum();
        for width in [4, 8, 16, 32, 64, 128, 256] {
            assert_eq!(subgroup_reduce(&values, width), expected);
        }
        assert_eq!(tree_reduce(&mut values.clone()), expected);
    }

    #[test]
    fn test_rejects_mismatched_store() {
        let geometry = DispatchGeometry::new(2, 1).unwrap();
        let store = RngStateStore::from_seed(1, 100);
        assert!(CpuSampler::new(geometry, store).is_err());
    }

    #[test]
    fn test_rejects_bad_subgroup_width() {
        let geometry = DispatchGeometry::new(1, 1).unwrap();
        let sampler = CpuSampler::seeded(geometry, 1).unwrap();
        assert!(sampler.with_subgroup_width(24).is_err());
    }

    #[test]
    fn test_rejects_bad_batch() {
        let geometry = DispatchGeometry::new(1, 1).unwrap();
        let mut sampler = CpuSampler::seeded(geometry, 1).unwrap();
        let params = SimParams {
            batch_size: 0,
            ..Default::default()
        };
        assert!(sampler.dispatch(&params, ReductionStrategy::Workgroup).is_err());
        assert_eq!(sampler.counts(), Counts::default());
    }

    #[test]
    fn test_one_add_per_group() {
        let geometry = DispatchGeometry::new(3, 1).unwrap();
        let mut sampler = CpuSampler::seeded(geometry, 8).unwrap();
        let params = SimParams {
            batch_size: 2,
            ..Default::default()
        };
        sampler.dispatch(&params, ReductionStrategy::Workgroup).unwrap();

        let slots = sampler.snapshot();
        for slot in &slots[..3] {
            assert_eq!(slot.total(), 256 * 2 * 8);
        }
        assert!(slots[3..].iter().all(|s| *s == Slot::default()));
    }

    #[test]
    fn test_viz_points_written() {
        let geometry = DispatchGeometry::new(1, 1).unwrap();
        let mut sampler = CpuSampler::seeded(geometry, 4).unwrap();
        let mut replay = sampler.rng().lanes()[17];
        let params = SimParams {
            batch_size: 1,
            ..Default::default()
        };
        sampler.dispatch(&params, ReductionStrategy::Subgroup).unwrap();

        let x = replay.next_unit_x4()[0];
        let y = replay.next_unit_x4()[0];
        let (vx, vy) = sampler.viz().point(17).unwrap();
        assert!((vx - x).abs() < 1e-3);
        assert!((vy - y).abs() < 1e-3);
    }
}
