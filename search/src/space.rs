//! Hardware-aligned tile-configuration enumeration.
//!
//! Memory levels are processed innermost first (register level, then shared
//! memory): the accepted configs of one level seed the base tiles of the
//! next. Per level, admissible tile values per axis come from the axis's
//! prime-factor multipliers (register level) or transaction-aligned multiples
//! (shared level), and the Cartesian product is walked in odometer order with
//! explicit per-axis cursors. Capacity violations reject a tuple outright and
//! skip the remainder of the innermost axis, since usage only grows with the
//! tile.

use smallvec::SmallVec;
use tracing::debug;

use tessera_ir::TensorRead;

use crate::aligned::{AlignedConfig, Tile};
use crate::error::Result;
use crate::task::SearchTask;
use crate::utils::{cumulative_prime_products, lcm};

/// Largest thread count a block may carry; above this launch is rejected
/// regardless of register pressure.
const MAX_THREADS_PER_BLOCK: i64 = 1024;

/// Cap on unit-multiple candidates per axis at the shared level.
const SMEM_CANDIDATES_PER_AXIS: usize = 32;

/// Reduction tile cap at the shared level.
const REDUCE_TILE_CAP: i64 = 32;

pub struct ConfigSpace<'a> {
    task: &'a SearchTask,
    space_names: Vec<String>,
    reduce_names: Vec<String>,
    /// Per space axis, extents across all workload instances.
    space_extents: Vec<Vec<i64>>,
    reduce_extents: Vec<Vec<i64>>,
    space_max: Vec<i64>,
    /// Space axes indexed by the innermost (fastest-striding) index of some
    /// operand read; their shared-level tiles align to the transaction width.
    need_align: Vec<bool>,
    /// Operand reads of the reduction stage, for footprint accounting.
    reads: Vec<TensorRead>,
    elem_bytes: i64,
}

impl<'a> ConfigSpace<'a> {
    pub fn new(task: &'a SearchTask) -> Result<Self> {
        let (_, stage) = task.reduction_stage()?;
        let space_names: Vec<String> = stage.space_axes().map(|a| a.name.clone()).collect();
        let reduce_names: Vec<String> = stage.reduce_axes().map(|a| a.name.clone()).collect();
        let (space_extents, reduce_extents) = task.axis_extents_per_instance()?;
        let space_max =
            space_extents.iter().map(|e| e.iter().copied().max().unwrap_or(1)).collect();
        let mut need_align = vec![false; space_names.len()];
        for read in &stage.reads {
            if let Some(inner) = read.innermost_axis()
                && let Some(j) = space_names.iter().position(|n| n == inner)
            {
                need_align[j] = true;
            }
        }
        Ok(Self {
            space_names,
            reduce_names,
            space_extents,
            reduce_extents,
            space_max,
            need_align,
            reads: stage.reads.clone(),
            elem_bytes: task.elem_bytes(),
            task,
        })
    }

    fn register_level(&self) -> usize {
        self.task.hardware.num_levels
    }

    /// Enumerate all capacity-feasible configs across every memory level.
    pub fn emit_configs(&self) -> Result<Vec<AlignedConfig>> {
        let num_levels = self.task.hardware.num_levels;
        let mut now: Vec<AlignedConfig> = Vec::new();
        let mut next: Vec<AlignedConfig> = Vec::new();
        for mem_level in (1..=num_levels).rev() {
            if now.is_empty() {
                let sbase = vec![1i64; self.space_names.len()];
                let rbase = vec![1i64; self.reduce_names.len()];
                let (space_cands, reduce_cands) = self.aligned_tiles(&sbase, &rbase, mem_level);
                self.enumerate(&mut next, None, mem_level, &space_cands, &reduce_cands);
            } else {
                for base in &now {
                    let sbase: Vec<i64> = base.space_tiles[mem_level].to_vec();
                    let rbase: Vec<i64> = base.reduce_tiles[mem_level].to_vec();
                    let (space_cands, reduce_cands) = self.aligned_tiles(&sbase, &rbase, mem_level);
                    self.enumerate(&mut next, Some(base), mem_level, &space_cands, &reduce_cands);
                }
            }
            debug!(mem_level, configs = next.len(), "tile level enumerated");
            std::mem::swap(&mut now, &mut next);
            next.clear();
            if now.is_empty() {
                break;
            }
        }
        Ok(now)
    }

    /// Admissible tile candidates per axis, given the inner level's base tile.
    fn aligned_tiles(
        &self,
        sbase: &[i64],
        rbase: &[i64],
        mem_level: usize,
    ) -> (Vec<Vec<i64>>, Vec<Vec<i64>>) {
        let mut space_cands = Vec::with_capacity(sbase.len());
        let mut reduce_cands = Vec::with_capacity(rbase.len());
        if mem_level == self.register_level() {
            for (i, &base) in sbase.iter().enumerate() {
                let mut mults = vec![1i64];
                mults.extend(cumulative_prime_products(self.space_max[i]));
                let cands: Vec<i64> =
                    mults.into_iter().map(|m| base * m).take_while(|v| *v <= self.space_max[i]).collect();
                space_cands.push(cands);
            }
            for _ in rbase {
                reduce_cands.push(vec![1]);
            }
        } else {
            let transaction_num =
                (self.task.hardware.transaction_size[0] / self.elem_bytes).max(1);
            for (i, &base) in sbase.iter().enumerate() {
                let step = if self.need_align[i] { lcm(base, transaction_num) } else { base };
                let cands: Vec<i64> = (1..=SMEM_CANDIDATES_PER_AXIS as i64)
                    .map(|j| step * j)
                    .take_while(|v| *v < self.space_max[i])
                    .collect();
                space_cands.push(cands);
            }
            for (i, &base) in rbase.iter().enumerate() {
                let mut rlen_cap = REDUCE_TILE_CAP;
                let mut next = lcm(base, transaction_num);
                let mut cands: Vec<i64> = Vec::new();
                for &extent in &self.reduce_extents[i] {
                    rlen_cap = rlen_cap.min(extent);
                    while next <= rlen_cap {
                        cands.push(next);
                        next += transaction_num;
                    }
                    if !cands.contains(&rlen_cap) {
                        cands.push(rlen_cap);
                    }
                }
                reduce_cands.push(cands);
            }
        }
        (space_cands, reduce_cands)
    }

    /// Odometer walk over the per-axis candidate lists: innermost space axis
    /// fastest, wrapping and carrying outward, then into the reduce cursors.
    /// A rejected tuple exhausts the innermost axis for the current prefix.
    fn enumerate(
        &self,
        out: &mut Vec<AlignedConfig>,
        base: Option<&AlignedConfig>,
        mem_level: usize,
        space_cands: &[Vec<i64>],
        reduce_cands: &[Vec<i64>],
    ) {
        if space_cands.is_empty()
            || reduce_cands.is_empty()
            || space_cands.iter().any(Vec::is_empty)
            || reduce_cands.iter().any(Vec::is_empty)
        {
            // A level with no admissible tiles for some axis abandons the
            // whole branch.
            return;
        }
        let mut sp = vec![0usize; space_cands.len()];
        let mut rp = vec![0usize; reduce_cands.len()];
        while rp[0] < reduce_cands[0].len() {
            let space_tile: Tile =
                sp.iter().zip(space_cands).map(|(&c, cands)| cands[c]).collect();
            let reduce_tile: Tile =
                rp.iter().zip(reduce_cands).map(|(&c, cands)| cands[c]).collect();
            let before = out.len();
            self.config_filter(out, base, &space_tile, &reduce_tile, mem_level);
            let innermost = sp.len() - 1;
            if out.len() == before {
                sp[innermost] = space_cands[innermost].len();
            } else {
                sp[innermost] += 1;
            }
            for i in (0..sp.len()).rev() {
                if sp[i] < space_cands[i].len() {
                    break;
                }
                sp[i] = 0;
                if i == 0 {
                    let last = rp.len() - 1;
                    rp[last] += 1;
                    for j in (1..rp.len()).rev() {
                        if rp[j] >= reduce_cands[j].len() {
                            rp[j] = 0;
                            rp[j - 1] += 1;
                        } else {
                            break;
                        }
                    }
                    break;
                }
                sp[i - 1] += 1;
            }
        }
    }

    /// Capacity check and metric derivation for one tile tuple. Infeasible
    /// tuples are silently dropped.
    fn config_filter(
        &self,
        out: &mut Vec<AlignedConfig>,
        base: Option<&AlignedConfig>,
        space_tile: &Tile,
        reduce_tile: &Tile,
        mem_level: usize,
    ) {
        let hw = &self.task.hardware;
        if mem_level == self.register_level() {
            let reg_use = self.footprint(space_tile, reduce_tile, mem_level);
            if reg_use > hw.reg_cap[1] {
                return;
            }
            let mut cfg = AlignedConfig::with_levels(hw.num_levels);
            cfg.space_tiles[mem_level - 1] = space_tile.clone();
            cfg.reduce_tiles[mem_level - 1] = reduce_tile.clone();
            cfg.k_threshold[mem_level - 1] =
                fold_negative(self.compute_intensive_threshold(space_tile, mem_level));
            cfg.compute_intensive_ratio[mem_level - 1] =
                self.compute_intensive_ratio(space_tile, reduce_tile, mem_level, reg_use);
            cfg.single_thread_reg_usage = reg_use;
            out.push(cfg);
        } else if mem_level == 1 {
            let Some(base) = base else { return };
            let smem_use = self.footprint(space_tile, reduce_tile, mem_level);
            if smem_use > hw.smem_cap[0] {
                return;
            }
            let threads = parallelism(space_tile, &base.space_tiles[mem_level]);
            if threads * base.single_thread_reg_usage > hw.reg_cap[0] {
                return;
            }
            if threads >= MAX_THREADS_PER_BLOCK {
                return;
            }
            let mut cfg = base.clone();
            cfg.space_tiles[mem_level - 1] = space_tile.clone();
            cfg.reduce_tiles[mem_level - 1] = reduce_tile.clone();
            cfg.k_threshold[mem_level - 1] =
                fold_negative(self.compute_intensive_threshold(space_tile, mem_level));
            cfg.compute_intensive_ratio[mem_level - 1] = self.compute_intensive_ratio(
                space_tile,
                reduce_tile,
                mem_level,
                smem_use / self.elem_bytes,
            );
            cfg.smem_usage = smem_use;
            cfg.threads_num = threads;
            cfg.space_production_threshold =
                hw.compute_sm_partition[0] * 2 * space_tile.iter().product::<i64>();
            out.push(cfg);
        }
    }

    /// Memory footprint of one tile tuple at one level, in elements for the
    /// register level and bytes for the shared level.
    ///
    /// Walks each operand read once per distinct producer and multiplies the
    /// tile sizes of the axes appearing in its index. At the register level
    /// the accumulator registers (the space-tile product) dominate instead.
    fn footprint(&self, space_tile: &[i64], reduce_tile: &[i64], mem_level: usize) -> i64 {
        let mut visited: SmallVec<[&str; 4]> = SmallVec::new();
        let mut usage = 0i64;
        for read in &self.reads {
            if visited.contains(&read.producer.as_str()) {
                continue;
            }
            let mut operand_use = 1i64;
            for axis in &read.index_axes {
                if let Some(j) = self.space_names.iter().position(|n| n == axis) {
                    operand_use *= space_tile[j];
                } else if let Some(j) = self.reduce_names.iter().position(|n| n == axis) {
                    operand_use *= reduce_tile[j];
                }
            }
            usage += operand_use;
            visited.push(&read.producer);
        }
        if mem_level == self.register_level() {
            usage = space_tile.iter().product();
        }
        if mem_level == 1 {
            usage *= self.elem_bytes;
        }
        usage
    }

    /// Compute/memory-bound crossover `k` for one level's space tile: the
    /// reduction length at which compute time overtakes the level's traffic.
    fn compute_intensive_threshold(&self, space_tile: &[i64], mem_level: usize) -> f64 {
        let hw = &self.task.hardware;
        let product: i64 = space_tile.iter().product();
        let sum: i64 = space_tile.iter().sum();
        let bytes = self.elem_bytes as f64;
        product as f64 * bytes
            / (2.0 * product as f64 * hw.bandwidth[mem_level - 1] as f64 / hw.peak_flops
                - sum as f64 * bytes)
    }

    /// FLOPs-per-byte of one tile tuple, normalized against peak throughput
    /// and the level's bandwidth.
    fn compute_intensive_ratio(
        &self,
        space_tile: &[i64],
        reduce_tile: &[i64],
        mem_level: usize,
        mem_use: i64,
    ) -> f64 {
        let hw = &self.task.hardware;
        let product: i64 =
            space_tile.iter().product::<i64>() * reduce_tile.iter().product::<i64>();
        let mem_use = if mem_level == self.register_level() {
            1 + space_tile.iter().sum::<i64>()
        } else {
            mem_use
        };
        (product as f64 * 2.0 / hw.peak_flops)
            / (mem_use as f64 * self.elem_bytes as f64 / hw.bandwidth[mem_level - 1] as f64)
    }
}

/// Thread parallelism implied by an outer tile over an inner one: the product
/// of per-axis quotients.
fn parallelism(outer: &[i64], inner: &[i64]) -> i64 {
    outer.iter().zip(inner.iter()).map(|(o, i)| (o / i).max(1)).product()
}

/// Keep all k-thresholds on one comparable positive scale: a negative result
/// (bandwidth can never catch compute at this tile) maps to `9999 - 1/k`.
fn fold_negative(k: f64) -> f64 {
    if k < 0.0 { 9999.0 - 1.0 / k } else { k }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{GpuVendor, Target};
    use tessera_hardware::HardwareDescriptor;
    use tessera_ir::{ComputeGraph, Extent, LoopAxis, Stage, TensorRead};

    fn small_gpu() -> HardwareDescriptor {
        HardwareDescriptor::builder()
            .bandwidth(vec![500, 10000])
            .peak_flops(10000.0)
            .reg_cap(vec![32768, 128])
            .smem_cap(vec![49152])
            .compute_sm_partition(vec![82, 1])
            .smem_sm_partition(vec![82, 2])
            .glbmem_sm_partition(vec![82, 32])
            .transaction_size(vec![32, 128])
            .num_cores(82)
            .max_smem_usage_per_sm(100 * 1024)
            .max_reg_per_sm(65536)
            .build()
    }

    fn vec_matmul_task(m: i64, k: i64) -> SearchTask {
        let graph = ComputeGraph::new(vec![Stage {
            name: "C".to_string(),
            axes: vec![
                LoopAxis::spatial("i", Extent::Const(m)),
                LoopAxis::reduction("k", Extent::Const(k)),
            ],
            reads: vec![TensorRead::new("A", &["i", "k"]), TensorRead::new("x", &["k"])],
            elem_bytes: 4,
        }]);
        SearchTask::builder()
            .graph(graph)
            .target(Target::Gpu { vendor: GpuVendor::Nvidia })
            .hardware(small_gpu())
            .workload_key("vec_matmul".to_string())
            .build()
    }

    #[test]
    fn test_emit_configs_nonempty_and_tiles_divide() {
        let task = vec_matmul_task(64, 32);
        let space = ConfigSpace::new(&task).unwrap();
        let configs = space.emit_configs().unwrap();
        assert!(!configs.is_empty());
        for cfg in &configs {
            // Register tiles come from the prime-product ladder of 64.
            let reg = cfg.space_tiles[1][0];
            assert_eq!(64 % reg, 0, "register tile {reg} must divide the axis extent");
            assert!(cfg.threads_num > 0);
        }
    }

    #[test]
    fn test_register_capacity_bound_holds() {
        let task = vec_matmul_task(64, 32);
        let space = ConfigSpace::new(&task).unwrap();
        for cfg in space.emit_configs().unwrap() {
            assert!(cfg.single_thread_reg_usage <= task.hardware.reg_cap[1]);
        }
    }

    #[test]
    fn test_shared_memory_capacity_bound_holds() {
        let task = vec_matmul_task(256, 128);
        let space = ConfigSpace::new(&task).unwrap();
        for cfg in space.emit_configs().unwrap() {
            assert!(cfg.smem_usage <= task.hardware.smem_cap[0]);
            assert!(cfg.threads_num < MAX_THREADS_PER_BLOCK);
        }
    }

    #[test]
    fn test_warp_divisible_configs_exist() {
        let task = vec_matmul_task(256, 32);
        let space = ConfigSpace::new(&task).unwrap();
        let configs = space.emit_configs().unwrap();
        assert!(
            configs.iter().any(|c| c.threads_num % task.hardware.thread_granularity() == 0),
            "at least one config should land on a full-warp thread count"
        );
    }

    #[test]
    fn test_need_align_tracks_innermost_reads() {
        let task = vec_matmul_task(64, 32);
        let space = ConfigSpace::new(&task).unwrap();
        // "i" never appears as an innermost index; "k" is a reduce axis.
        assert_eq!(space.need_align, vec![false]);
    }

    #[test]
    fn test_zero_levels_emits_nothing() {
        let mut task = vec_matmul_task(64, 32);
        task.hardware = HardwareDescriptor::generic();
        let space = ConfigSpace::new(&task).unwrap();
        assert!(space.emit_configs().unwrap().is_empty());
    }

    #[test]
    fn test_fold_negative_keeps_scale_positive() {
        assert_eq!(fold_negative(2.5), 2.5);
        let folded = fold_negative(-0.5);
        assert!(folded > 9999.0);
    }

    #[test]
    fn test_parallelism_is_quotient_product() {
        assert_eq!(parallelism(&[32, 16], &[4, 2]), 64);
        assert_eq!(parallelism(&[4], &[4]), 1);
    }
}
