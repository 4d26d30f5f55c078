//! Matmul tensor-core strategy configuration.
//!
//! A `MatmulStrategy` is built once per strategy application from the
//! compiled-in defaults plus optional overrides (CLI flags or a strategy
//! file), validated, and then only read. Every hardware mapping is derived
//! from it on demand (see `mapping`).

pub mod mapping;
pub mod validate;


use std::fmt;

use crate::config::target::GpuTarget;

pub use mapping::{
    Axis, MappingInfo, MappingLevel, MappingPolicy, MappingTag, Operand, TensorCorePolicy,
};
pub use validate::ValidationError;

pub const DEFAULT_BLOCK_TILE_SIZES: [i64; 3] = [128, 128, 1];
pub const DEFAULT_REDUCTION_TILE_SIZE: i64 = 16;
pub const DEFAULT_NUM_THREADS: [i64; 3] = [64, 2, 1];
pub const DEFAULT_NUM_WARPS: [i64; 3] = [2, 2, 1];
pub const DEFAULT_USE_ASYNC_COPIES: bool = true;
pub const DEFAULT_USE_MMA_SYNC: bool = true;
pub const DEFAULT_PIPELINE_DEPTH: i64 = 3;

/// Element type of a matmul operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    F16,
    BF16,
    F32,
    I8,
    I32,
}

impl ElementType {
    pub fn bit_width(self) -> i64 {
        match self {
            ElementType::I8 => 8,
            ElementType::F16 | ElementType::BF16 => 16,
            ElementType::F32 | ElementType::I32 => 32,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "f16" => Some(ElementType::F16),
            "bf16" => Some(ElementType::BF16),
            "f32" => Some(ElementType::F32),
            "i8" => Some(ElementType::I8),
            "i32" => Some(ElementType::I32),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::F16 => "f16",
            ElementType::BF16 => "bf16",
            ElementType::F32 => "f32",
            ElementType::I8 => "i8",
            ElementType::I32 => "i32",
        };
        f.write_str(name)
    }
}

/// Facts recorded by the matcher that selected this strategy: problem sizes
/// and operand element types of `res[m, n] += lhs[m, k] * rhs[k, n]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatmulCaptures {
    pub m: i64,
    pub n: i64,
    pub k: i64,
    pub lhs_element: ElementType,
    pub rhs_element: ElementType,
    pub res_element: ElementType,
}

impl MatmulCaptures {
    /// An `m x n x k` matmul with f32 operands and accumulator.
    pub fn f32(m: i64, n: i64, k: i64) -> Self {
        Self {
            m,
            n,
            k,
            lhs_element: ElementType::F32,
            rhs_element: ElementType::F32,
            res_element: ElementType::F32,
        }
    }

    pub fn with_elements(mut self, lhs: ElementType, rhs: ElementType, res: ElementType) -> Self {
        self.lhs_element = lhs;
        self.rhs_element = rhs;
        self.res_element = res;
        self
    }
}

impl Default for MatmulCaptures {
    fn default() -> Self {
        Self::f32(1024, 1024, 1024)
    }
}

/// Externally supplied problem facts, layered like `StrategyOverrides`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProblemOverrides {
    pub m: Option<i64>,
    pub n: Option<i64>,
    pub k: Option<i64>,
    pub lhs_element: Option<ElementType>,
    pub rhs_element: Option<ElementType>,
    pub res_element: Option<ElementType>,
}

impl ProblemOverrides {
    /// Layer `other` on top of `self`: values set in `other` win.
    pub fn merge(self, other: &ProblemOverrides) -> Self {
        Self {
            m: other.m.or(self.m),
            n: other.n.or(self.n),
            k: other.k.or(self.k),
            lhs_element: other.lhs_element.or(self.lhs_element),
            rhs_element: other.rhs_element.or(self.rhs_element),
            res_element: other.res_element.or(self.res_element),
        }
    }

    pub fn apply(&self, base: MatmulCaptures) -> MatmulCaptures {
        MatmulCaptures {
            m: self.m.unwrap_or(base.m),
            n: self.n.unwrap_or(base.n),
            k: self.k.unwrap_or(base.k),
            lhs_element: self.lhs_element.unwrap_or(base.lhs_element),
            rhs_element: self.rhs_element.unwrap_or(base.rhs_element),
            res_element: self.res_element.unwrap_or(base.res_element),
        }
    }
}

/// Externally supplied values that replace individual defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StrategyOverrides {
    pub block_tile_sizes: Option<Vec<i64>>,
    pub reduction_tile_size: Option<i64>,
    pub num_threads: Option<Vec<i64>>,
    pub num_warps: Option<Vec<i64>>,
    pub use_async_copies: Option<bool>,
    pub use_mma_sync: Option<bool>,
    pub pipeline_depth: Option<i64>,
}

impl StrategyOverrides {
    /// Layer `other` on top of `self`: values set in `other` win.
    pub fn merge(mut self, other: &StrategyOverrides) -> Self {
        if other.block_tile_sizes.is_some() {
            self.block_tile_sizes = other.block_tile_sizes.clone();
        }
        if other.reduction_tile_size.is_some() {
            self.reduction_tile_size = other.reduction_tile_size;
        }
        if other.num_threads.is_some() {
            self.num_threads = other.num_threads.clone();
        }
        if other.num_warps.is_some() {
            self.num_warps = other.num_warps.clone();
        }
        if other.use_async_copies.is_some() {
            self.use_async_copies = other.use_async_copies;
        }
        if other.use_mma_sync.is_some() {
            self.use_mma_sync = other.use_mma_sync;
        }
        if other.pipeline_depth.is_some() {
            self.pipeline_depth = other.pipeline_depth;
        }
        self
    }
}

/// Configuration of one tensor-core matmul strategy application.
#[derive(Clone, Debug, PartialEq)]
pub struct MatmulStrategy {
    /// Block-level tile extents for dims (x, y, z).
    pub block_tile_sizes: Vec<i64>,
    /// Sequential tile extent along the reduction dimension.
    pub reduction_tile_size: i64,
    /// Lanes per dim (x, y, z) at the compute stage.
    pub num_threads: Vec<i64>,
    /// Warps per dim (x, y, z).
    pub num_warps: Vec<i64>,
    pub use_async_copies: bool,
    pub use_mma_sync: bool,
    /// Multi-buffering / software pipelining depth; `<= 1` disables overlap.
    pub pipeline_depth: i64,
    /// Fill value per operand (lhs, rhs, res).
    pub padding_values: Vec<f32>,
    pub padding_dimensions: Vec<i64>,
    pub packing_dimensions: Vec<i64>,
    /// True if any tunable deviates from its compiled-in default.
    pub cli_options_specified: bool,
    pub captures: MatmulCaptures,
    pub target: GpuTarget,
}

impl MatmulStrategy {
    /// Populate every tunable from the defaults, then apply `overrides`.
    pub fn new(captures: MatmulCaptures, target: GpuTarget, overrides: &StrategyOverrides) -> Self {
        let mut strategy = Self {
            block_tile_sizes: DEFAULT_BLOCK_TILE_SIZES.to_vec(),
            reduction_tile_size: DEFAULT_REDUCTION_TILE_SIZE,
            num_threads: DEFAULT_NUM_THREADS.to_vec(),
            num_warps: DEFAULT_NUM_WARPS.to_vec(),
            use_async_copies: DEFAULT_USE_ASYNC_COPIES,
            use_mma_sync: DEFAULT_USE_MMA_SYNC,
            pipeline_depth: DEFAULT_PIPELINE_DEPTH,
            // TODO: derive the fill values from the captured element types
            // once integer accumulators are matched.
            padding_values: vec![0.0, 0.0, 0.0],
            padding_dimensions: vec![0, 1, 2],
            packing_dimensions: vec![1, 1, 1],
            cli_options_specified: false,
            captures,
            target,
        };
        strategy.init_values(overrides);
        strategy
    }

    /// Default configuration for `captures` on the default target.
    pub fn with_defaults(captures: MatmulCaptures) -> Self {
        Self::new(captures, GpuTarget::default(), &StrategyOverrides::default())
    }

    fn init_values(&mut self, overrides: &StrategyOverrides) {
        if let Some(sizes) = &overrides.block_tile_sizes {
            self.block_tile_sizes = sizes.clone();
        }
        if let Some(size) = overrides.reduction_tile_size {
            self.reduction_tile_size = size;
        }
        if let Some(threads) = &overrides.num_threads {
            self.num_threads = threads.clone();
        }
        if let Some(warps) = &overrides.num_warps {
            self.num_warps = warps.clone();
        }
        if let Some(flag) = overrides.use_async_copies {
            self.use_async_copies = flag;
        }
        if let Some(flag) = overrides.use_mma_sync {
            self.use_mma_sync = flag;
        }
        if let Some(depth) = overrides.pipeline_depth {
            self.pipeline_depth = depth;
        }

        self.cli_options_specified = self.block_tile_sizes != DEFAULT_BLOCK_TILE_SIZES
            || self.num_threads != DEFAULT_NUM_THREADS
            || self.num_warps != DEFAULT_NUM_WARPS
            || self.reduction_tile_size != DEFAULT_REDUCTION_TILE_SIZE
            || self.use_async_copies != DEFAULT_USE_ASYNC_COPIES
            || self.use_mma_sync != DEFAULT_USE_MMA_SYNC
            || self.pipeline_depth != DEFAULT_PIPELINE_DEPTH;
    }

    // --- Derived quantities ---

    pub fn block_tile_m(&self) -> i64 {
        self.block_tile_sizes.first().copied().unwrap_or(0)
    }

    pub fn block_tile_n(&self) -> i64 {
        self.block_tile_sizes.get(1).copied().unwrap_or(0)
    }

    /// Product of `num_threads`, saturating at `i64::MAX`. `validate`
    /// rejects configurations where the exact product does not fit.
    pub fn total_num_threads(&self) -> i64 {
        saturating_product(&self.num_threads)
    }

    pub fn total_num_warps(&self) -> i64 {
        saturating_product(&self.num_warps)
    }

    /// Warps along the m (y) and n (x) dimensions.
    pub fn num_warps_y(&self) -> i64 {
        self.num_warps.get(1).copied().unwrap_or(1)
    }

    pub fn num_warps_x(&self) -> i64 {
        self.num_warps.first().copied().unwrap_or(1)
    }

    pub fn aligned_lhs(&self) -> bool {
        divides(self.block_tile_m(), self.captures.m)
            && divides(self.reduction_tile_size, self.captures.k)
    }

    pub fn aligned_rhs(&self) -> bool {
        divides(self.block_tile_n(), self.captures.n)
            && divides(self.reduction_tile_size, self.captures.k)
    }

    pub fn aligned_res(&self) -> bool {
        divides(self.block_tile_m(), self.captures.m)
            && divides(self.block_tile_n(), self.captures.n)
    }

    /// Whether the staged copies run multi-buffered and software-pipelined.
    pub fn pipelines_copies(&self) -> bool {
        self.use_async_copies && self.pipeline_depth > 1
    }

    // Mapping queries below use the default `TensorCorePolicy`.

    pub fn block_mapping(&self) -> MappingInfo {
        TensorCorePolicy.block_mapping(self)
    }

    pub fn compute_mapping(&self) -> MappingInfo {
        TensorCorePolicy.compute_mapping(self)
    }

    pub fn lhs_copy_mapping(&self) -> MappingInfo {
        TensorCorePolicy.copy_mapping(self, Operand::Lhs)
    }

    pub fn rhs_copy_mapping(&self) -> MappingInfo {
        TensorCorePolicy.copy_mapping(self, Operand::Rhs)
    }

    pub fn res_copy_mapping(&self) -> MappingInfo {
        TensorCorePolicy.copy_mapping(self, Operand::Res)
    }

    /// Print the configuration and its derived copy mappings to stderr.
    pub fn dump(&self) {
        self.dump_with(&TensorCorePolicy);
    }

    /// Like `dump`, with the copy mappings derived by `policy`.
    pub fn dump_with(&self, policy: &dyn MappingPolicy) {
        eprintln!("{}", self.display_with(policy));
    }

    /// Displayable view of the configuration under `policy`.
    pub fn display_with<'a>(&'a self, policy: &'a dyn MappingPolicy) -> StrategyDisplay<'a> {
        StrategyDisplay {
            strategy: self,
            policy,
        }
    }
}

fn saturating_product(values: &[i64]) -> i64 {
    values.iter().fold(1i64, |acc, &v| acc.saturating_mul(v))
}

fn divides(tile: i64, size: i64) -> bool {
    tile > 0 && size % tile == 0
}

fn join(values: &[i64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `Display` adapter pairing a strategy with the policy its mappings come
/// from. See `MatmulStrategy::display_with`.
pub struct StrategyDisplay<'a> {
    strategy: &'a MatmulStrategy,
    policy: &'a dyn MappingPolicy,
}

impl fmt::Display for MatmulStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.display_with(&TensorCorePolicy), f)
    }
}

impl fmt::Display for StrategyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.strategy;
        let c = &s.captures;
        writeln!(f, "matmul strategy (target {})", s.target.name)?;
        writeln!(
            f,
            "  problem:             {}x{}x{} ({} * {} -> {})",
            c.m, c.n, c.k, c.lhs_element, c.rhs_element, c.res_element
        )?;
        writeln!(f, "  overridden:          {}", s.cli_options_specified)?;
        writeln!(f, "  block tile sizes:    [{}]", join(&s.block_tile_sizes))?;
        writeln!(f, "  reduction tile size: {}", s.reduction_tile_size)?;
        writeln!(f, "  num threads:         [{}]", join(&s.num_threads))?;
        writeln!(f, "  num warps:           [{}]", join(&s.num_warps))?;
        writeln!(f, "  use async copies:    {}", s.use_async_copies)?;
        writeln!(f, "  use mma sync:        {}", s.use_mma_sync)?;
        writeln!(f, "  pipeline depth:      {}", s.pipeline_depth)?;
        writeln!(f, "derived")?;
        writeln!(
            f,
            "  aligned (lhs/rhs/res): {}/{}/{}",
            s.aligned_lhs(),
            s.aligned_rhs(),
            s.aligned_res()
        )?;
        let copies: Vec<String> = Operand::ALL
            .iter()
            .map(|&op| format!("  {} copy: {}", op.name(), self.policy.copy_mapping(s, op)))
            .collect();
        write!(f, "{}", copies.join("\n"))
    }
}
