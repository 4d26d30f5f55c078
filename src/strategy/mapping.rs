//! Iteration space → hardware resource mappings.
//!
//! The arithmetic lives behind `MappingPolicy` so a different target family
//! can plug in its own formulas. Whatever the policy, the compute mapping and
//! the three copy mappings must bind the same axes in the same order, so the
//! block, compute and copy phases compose without a remapping step.

use std::fmt;

use super::MatmulStrategy;

/// Maximum number of bits a single lane moves per copy instruction.
pub const MAX_COPY_BITS_PER_LANE: i64 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MappingLevel {
    Block,
    Warp,
    Thread,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

/// Which hardware axis one loop dimension binds to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MappingTag {
    pub level: MappingLevel,
    pub axis: Axis,
}

impl MappingTag {
    pub const fn new(level: MappingLevel, axis: Axis) -> Self {
        Self { level, axis }
    }

    pub const fn block(axis: Axis) -> Self {
        Self::new(MappingLevel::Block, axis)
    }

    pub const fn warp(axis: Axis) -> Self {
        Self::new(MappingLevel::Warp, axis)
    }

    pub const fn thread(axis: Axis) -> Self {
        Self::new(MappingLevel::Thread, axis)
    }
}

impl fmt::Display for MappingTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            MappingLevel::Block => "block",
            MappingLevel::Warp => "warp",
            MappingLevel::Thread => "thread",
        };
        let axis = match self.axis {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        write!(f, "{}.{}", level, axis)
    }
}

/// One "loop nest → hardware resource" assignment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MappingInfo {
    /// Parallel resources per mapped dim (empty when tiling by size).
    pub num_threads: Vec<i64>,
    /// Tile extents per mapped dim (empty when tiling by thread count).
    pub tile_sizes: Vec<i64>,
    pub thread_mapping: Vec<MappingTag>,
    /// Elements moved per lane per copy, for copy mappings.
    pub vector_size: Option<i64>,
}

impl MappingInfo {
    pub fn axes(&self) -> Vec<Axis> {
        self.thread_mapping.iter().map(|tag| tag.axis).collect()
    }

    /// Same number of mapped dims, bound to the same axes in the same order.
    pub fn is_consistent_with(&self, other: &MappingInfo) -> bool {
        self.axes() == other.axes()
    }
}

impl fmt::Display for MappingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |v: &[i64]| {
            v.iter()
                .map(|x| x.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut parts = Vec::new();
        if !self.num_threads.is_empty() {
            parts.push(format!("threads [{}]", list(&self.num_threads)));
        }
        if !self.tile_sizes.is_empty() {
            parts.push(format!("tile [{}]", list(&self.tile_sizes)));
        }
        if let Some(vector) = self.vector_size {
            parts.push(format!("vector {}", vector));
        }
        let tags = self
            .thread_mapping
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{} -> [{}]", parts.join(" "), tags)
    }
}

/// Matmul operands, in the order padding values are listed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operand {
    Lhs,
    Rhs,
    Res,
}

impl Operand {
    pub const ALL: [Operand; 3] = [Operand::Lhs, Operand::Rhs, Operand::Res];

    pub fn name(self) -> &'static str {
        match self {
            Operand::Lhs => "lhs",
            Operand::Rhs => "rhs",
            Operand::Res => "res",
        }
    }
}

/// Derives hardware mappings from a strategy configuration.
pub trait MappingPolicy {
    /// Block-level distribution of the matmul and its fused fill.
    fn block_mapping(&self, strategy: &MatmulStrategy) -> MappingInfo;

    /// Warp-level distribution of the padded matmul and its fill.
    fn compute_mapping(&self, strategy: &MatmulStrategy) -> MappingInfo;

    /// Lane distribution of one operand's staging copy.
    fn copy_mapping(&self, strategy: &MatmulStrategy, operand: Operand) -> MappingInfo;
}

/// Default policy for warp-synchronous tensor-core targets.
///
/// Copies are sized so that every lane moves `MAX_COPY_BITS_PER_LANE` bits
/// when the operand's alignment allows it, whatever its element type.
#[derive(Clone, Copy, Debug, Default)]
pub struct TensorCorePolicy;

impl MappingPolicy for TensorCorePolicy {
    fn block_mapping(&self, strategy: &MatmulStrategy) -> MappingInfo {
        MappingInfo {
            num_threads: Vec::new(),
            tile_sizes: vec![strategy.block_tile_m(), strategy.block_tile_n()],
            thread_mapping: vec![MappingTag::block(Axis::Y), MappingTag::block(Axis::X)],
            vector_size: None,
        }
    }

    fn compute_mapping(&self, strategy: &MatmulStrategy) -> MappingInfo {
        MappingInfo {
            num_threads: vec![strategy.num_warps_y(), strategy.num_warps_x()],
            tile_sizes: Vec::new(),
            thread_mapping: vec![MappingTag::warp(Axis::Y), MappingTag::warp(Axis::X)],
            vector_size: None,
        }
    }

    fn copy_mapping(&self, strategy: &MatmulStrategy, operand: Operand) -> MappingInfo {
        let c = &strategy.captures;
        let reduction = strategy.reduction_tile_size;
        let (sizes, problem_inner, element) = match operand {
            Operand::Lhs => ([strategy.block_tile_m(), reduction], c.k, c.lhs_element),
            Operand::Rhs => ([reduction, strategy.block_tile_n()], c.n, c.rhs_element),
            Operand::Res => (
                [strategy.block_tile_m(), strategy.block_tile_n()],
                c.n,
                c.res_element,
            ),
        };
        copy_mapping_for(
            strategy.total_num_threads(),
            sizes,
            problem_inner,
            element.bit_width(),
        )
    }
}

/// Spread a 2-D `[outer, inner]` copy tile over `total_threads` lanes.
///
/// The vector width is the widest power of two that fits in
/// `MAX_COPY_BITS_PER_LANE` and divides both the tile's and the problem's
/// inner extent. Lanes fill the inner dimension first.
pub fn copy_mapping_for(
    total_threads: i64,
    sizes: [i64; 2],
    problem_inner: i64,
    bit_width: i64,
) -> MappingInfo {
    let total = total_threads.max(1);
    let [outer, inner] = [sizes[0].max(1), sizes[1].max(1)];

    let mut vector = (MAX_COPY_BITS_PER_LANE / bit_width.max(1)).max(1);
    while vector > 1 && (inner % vector != 0 || problem_inner % vector != 0) {
        vector /= 2;
    }

    let inner_threads = gcd(inner / vector, total).max(1);
    let outer_threads = gcd(outer, total / inner_threads).max(1);

    MappingInfo {
        num_threads: vec![outer_threads, inner_threads],
        tile_sizes: vec![outer / outer_threads, inner / inner_threads],
        thread_mapping: vec![MappingTag::thread(Axis::Y), MappingTag::thread(Axis::X)],
        vector_size: Some(vector),
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{ElementType, MatmulCaptures};

    #[test]
    fn test_default_block_mapping() {
        let s = MatmulStrategy::with_defaults(MatmulCaptures::default());
        let block = s.block_mapping();
        assert_eq!(block.tile_sizes, vec![128, 128]);
        assert!(block.num_threads.is_empty());
        assert_eq!(
            block.thread_mapping,
            vec![MappingTag::block(Axis::Y), MappingTag::block(Axis::X)]
        );
    }

    #[test]
    fn test_default_compute_mapping() {
        let s = MatmulStrategy::with_defaults(MatmulCaptures::default());
        let compute = s.compute_mapping();
        assert_eq!(compute.num_threads, vec![2, 2]);
        assert_eq!(compute.to_string(), "threads [2, 2] -> [warp.y, warp.x]");
    }

    #[test]
    fn test_f32_copy_moves_four_elements_per_lane() {
        let s = MatmulStrategy::with_defaults(MatmulCaptures::default());
        let lhs = s.lhs_copy_mapping();
        assert_eq!(lhs.vector_size, Some(4));
        assert_eq!(lhs.num_threads, vec![32, 4]);
        assert_eq!(lhs.tile_sizes, vec![4, 4]);
        assert_eq!(lhs.num_threads.iter().product::<i64>(), s.total_num_threads());
    }

    #[test]
    fn test_copy_vector_scales_with_bit_width() {
        let f16 = MatmulCaptures::f32(1024, 1024, 1024).with_elements(
            ElementType::F16,
            ElementType::F16,
            ElementType::F32,
        );
        let s = MatmulStrategy::with_defaults(f16);
        assert_eq!(s.lhs_copy_mapping().vector_size, Some(8));
        assert_eq!(s.rhs_copy_mapping().vector_size, Some(8));
        assert_eq!(s.res_copy_mapping().vector_size, Some(4));
        // Bytes per lane stay at 16 regardless of precision.
        for (mapping, bits) in [(s.lhs_copy_mapping(), 16), (s.res_copy_mapping(), 32)] {
            assert_eq!(mapping.vector_size.unwrap() * bits, MAX_COPY_BITS_PER_LANE);
        }
    }

    #[test]
    fn test_unaligned_problem_narrows_vector() {
        // k = 1022 is only divisible by 2.
        let s = MatmulStrategy::with_defaults(MatmulCaptures::f32(1024, 1024, 1022));
        assert_eq!(s.lhs_copy_mapping().vector_size, Some(2));
        assert_eq!(s.rhs_copy_mapping().vector_size, Some(4));
    }

    #[test]
    fn test_copy_mapping_handles_degenerate_input() {
        let m = copy_mapping_for(0, [0, 0], 0, 0);
        assert_eq!(m.num_threads, vec![1, 1]);
        assert_eq!(m.thread_mapping.len(), 2);
    }

    #[test]
    fn test_consistency_ignores_level() {
        let s = MatmulStrategy::with_defaults(MatmulCaptures::default());
        assert!(s.lhs_copy_mapping().is_consistent_with(&s.compute_mapping()));
        assert!(!s.block_mapping().is_consistent_with(&MappingInfo::default()));
    }

    #[test]
    fn test_gcd() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(0, 7), 7);
        assert_eq!(gcd(7, 0), 7);
    }
}
