//! Per-device hardware facts.
//!
//! Index conventions: two-element capacity vectors are `[outer, inner]` —
//! `reg_cap = [per-block, per-thread]`; partition vectors are
//! `[SM count, per-SM share]`. `bandwidth[level - 1]` is the bandwidth feeding
//! memory level `level`, with level 1 = shared memory and level 2 = registers.

use bon::bon;

/// Immutable description of one device's memory hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareDescriptor {
    /// Addressable memory levels above global (0 disables hardware-aligned tiling).
    pub num_levels: usize,
    /// GB/s feeding each level, outermost first.
    pub bandwidth: Vec<i64>,
    /// Peak throughput in GFLOPS.
    pub peak_flops: f64,
    /// Register capacity `[per-block, per-thread]`.
    pub reg_cap: Vec<i64>,
    /// Shared-memory capacity per block, in bytes.
    pub smem_cap: Vec<i64>,
    /// `[SM count, max parallel blocks per SM]` for compute issue.
    pub compute_sm_partition: Vec<i64>,
    /// `[SM count, max resident blocks per SM]` for shared memory.
    pub smem_sm_partition: Vec<i64>,
    /// `[SM count, transactions per SM]` for global memory.
    pub glbmem_sm_partition: Vec<i64>,
    /// Memory transaction sizes in bytes, smallest first.
    pub transaction_size: Vec<i64>,
    pub warp_size: i64,
    pub num_cores: i64,
    pub max_smem_usage_per_sm: i64,
    pub max_reg_per_sm: i64,
    /// Occupancy-skew coefficient applied below core count.
    pub lt_ratio: f64,
    /// Occupancy-skew coefficient applied at or above core count.
    pub gt_ratio: f64,
}

#[bon]
impl HardwareDescriptor {
    #[builder]
    pub fn builder(
        #[builder(default = 2)] num_levels: usize,
        bandwidth: Vec<i64>,
        peak_flops: f64,
        reg_cap: Vec<i64>,
        smem_cap: Vec<i64>,
        compute_sm_partition: Vec<i64>,
        smem_sm_partition: Vec<i64>,
        glbmem_sm_partition: Vec<i64>,
        transaction_size: Vec<i64>,
        #[builder(default = 32)] warp_size: i64,
        num_cores: i64,
        max_smem_usage_per_sm: i64,
        max_reg_per_sm: i64,
        #[builder(default = 1.0)] lt_ratio: f64,
        #[builder(default = 1.0)] gt_ratio: f64,
    ) -> Self {
        Self {
            num_levels,
            bandwidth,
            peak_flops,
            reg_cap,
            smem_cap,
            compute_sm_partition,
            smem_sm_partition,
            glbmem_sm_partition,
            transaction_size,
            warp_size,
            num_cores,
            max_smem_usage_per_sm,
            max_reg_per_sm,
            lt_ratio,
            gt_ratio,
        }
    }
}

impl HardwareDescriptor {
    /// GeForce RTX 3090 (Ampere, GA102).
    pub fn rtx3090() -> Self {
        Self {
            num_levels: 2,
            bandwidth: vec![782, 18247],
            peak_flops: 28374.0,
            reg_cap: vec![32768, 128],
            smem_cap: vec![49152],
            compute_sm_partition: vec![82, 4],
            smem_sm_partition: vec![82, 2],
            glbmem_sm_partition: vec![82, 32],
            transaction_size: vec![32, 128],
            warp_size: 32,
            num_cores: 82,
            max_smem_usage_per_sm: 100 * 1024,
            max_reg_per_sm: 65536,
            lt_ratio: 1.0,
            gt_ratio: 1.0,
        }
    }

    /// Placeholder for devices without a hierarchy description; selects the
    /// generic (non-hardware-aligned) tiling path.
    pub fn generic() -> Self {
        Self {
            num_levels: 0,
            bandwidth: Vec::new(),
            peak_flops: 0.0,
            reg_cap: Vec::new(),
            smem_cap: Vec::new(),
            compute_sm_partition: Vec::new(),
            smem_sm_partition: Vec::new(),
            glbmem_sm_partition: Vec::new(),
            transaction_size: Vec::new(),
            warp_size: 32,
            num_cores: 1,
            max_smem_usage_per_sm: 0,
            max_reg_per_sm: 0,
            lt_ratio: 1.0,
            gt_ratio: 1.0,
        }
    }

    pub fn has_aligned_levels(&self) -> bool {
        self.num_levels > 0
    }

    /// Thread-count granularity: full warps per SM compute slice.
    pub fn thread_granularity(&self) -> i64 {
        self.warp_size * self.compute_sm_partition[1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtx3090_preset() {
        let hw = HardwareDescriptor::rtx3090();
        assert_eq!(hw.num_levels, 2);
        assert_eq!(hw.bandwidth, vec![782, 18247]);
        assert_eq!(hw.reg_cap, vec![32768, 128]);
        assert_eq!(hw.thread_granularity(), 128);
    }

    #[test]
    fn test_generic_has_no_aligned_levels() {
        assert!(!HardwareDescriptor::generic().has_aligned_levels());
        assert!(HardwareDescriptor::rtx3090().has_aligned_levels());
    }

    #[test]
    fn test_builder_defaults() {
        let hw = HardwareDescriptor::builder()
            .bandwidth(vec![500, 10000])
            .peak_flops(10000.0)
            .reg_cap(vec![16384, 64])
            .smem_cap(vec![32768])
            .compute_sm_partition(vec![40, 2])
            .smem_sm_partition(vec![40, 2])
            .glbmem_sm_partition(vec![40, 16])
            .transaction_size(vec![32, 128])
            .num_cores(40)
            .max_smem_usage_per_sm(64 * 1024)
            .max_reg_per_sm(65536)
            .build();
        assert_eq!(hw.num_levels, 2);
        assert_eq!(hw.warp_size, 32);
        assert_eq!(hw.lt_ratio, 1.0);
    }
}
