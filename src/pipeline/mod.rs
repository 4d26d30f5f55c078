//! Tensor-core matmul strategy pipeline.
//!
//! The strategy is an ordered list of phases. Each phase has a static
//! predicate over the configuration that decides whether it runs, and a body
//! that issues library calls and threads handles to later phases:
//!
//! ```text
//! match → block distribution → reduction tiling → padding → [hoist] → canonicalize
//!   → copy distribution → warp distribution → vectorize → bufferize
//!   → (re-match func) map to blocks/threads → barrier elimination → tensor core
//!   → [multi-buffer] → [async copies] → [software pipelining] → cleanup
//! ```
//!
//! Bufferization invalidates every handle acquired before it; the phases
//! after it only use handles obtained from a fresh match.

pub mod graph;


use std::fmt;

use crate::strategy::{MappingPolicy, MatmulStrategy, Operand, TensorCorePolicy, ValidationError};
use crate::transform::{
    CopyMappings, DistributedCopies, Handle, PadOptions, TransformError, TransformLibrary,
};

/// Name of the registered matcher that selected this strategy.
pub const MATMUL_MATCHER: &str = "matmul";
/// Op name re-matched after bufferization.
pub const FUNC_OP: &str = "func.func";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Match,
    BlockDistribution,
    ReductionTiling,
    OperandPadding,
    HoistOutputPadding,
    Canonicalize,
    DistributeCopies,
    WarpDistribution,
    Vectorize,
    Bufferize,
    MapToBlocksAndThreads,
    EliminateBarriers,
    TensorCoreConversion,
    MultiBuffering,
    AsyncCopies,
    SoftwarePipelining,
    Cleanup,
}

impl PhaseKind {
    pub fn name(self) -> &'static str {
        match self {
            PhaseKind::Match => "match",
            PhaseKind::BlockDistribution => "block-distribution",
            PhaseKind::ReductionTiling => "reduction-tiling",
            PhaseKind::OperandPadding => "operand-padding",
            PhaseKind::HoistOutputPadding => "hoist-output-padding",
            PhaseKind::Canonicalize => "canonicalize",
            PhaseKind::DistributeCopies => "distribute-copies",
            PhaseKind::WarpDistribution => "warp-distribution",
            PhaseKind::Vectorize => "vectorize",
            PhaseKind::Bufferize => "bufferize",
            PhaseKind::MapToBlocksAndThreads => "map-to-blocks-and-threads",
            PhaseKind::EliminateBarriers => "eliminate-barriers",
            PhaseKind::TensorCoreConversion => "tensor-core-conversion",
            PhaseKind::MultiBuffering => "multi-buffering",
            PhaseKind::AsyncCopies => "async-copies",
            PhaseKind::SoftwarePipelining => "software-pipelining",
            PhaseKind::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a strategy could not be built.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    /// The configuration failed validation; no library call was made.
    #[error("invalid matmul strategy: {}", summarize(.0))]
    InvalidConfig(Vec<ValidationError>),
    /// A library call failed. Applicability was established by the matcher
    /// that selected this strategy, so this is an internal error.
    #[error("phase `{phase}` failed: {source}")]
    Phase {
        phase: PhaseKind,
        source: TransformError,
    },
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Static inclusion predicate of a conditional phase.
#[derive(Clone, Copy)]
pub struct Condition {
    pub description: &'static str,
    pub holds: fn(&MatmulStrategy) -> bool,
}

/// One step of the pipeline.
pub struct Phase {
    pub kind: PhaseKind,
    /// `None` for phases that always run.
    pub when: Option<Condition>,
    run: fn(&mut PhaseContext<'_>) -> Result<(), TransformError>,
}

impl Phase {
    pub fn is_conditional(&self) -> bool {
        self.when.is_some()
    }

    pub fn is_enabled(&self, strategy: &MatmulStrategy) -> bool {
        self.when.map_or(true, |c| (c.holds)(strategy))
    }
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("kind", &self.kind)
            .field("when", &self.when.map(|c| c.description))
            .finish()
    }
}

/// Every phase, in execution order.
pub static PHASES: [Phase; 17] = [
    Phase {
        kind: PhaseKind::Match,
        when: None,
        run: run_match,
    },
    Phase {
        kind: PhaseKind::BlockDistribution,
        when: None,
        run: run_block_distribution,
    },
    Phase {
        kind: PhaseKind::ReductionTiling,
        when: None,
        run: run_reduction_tiling,
    },
    Phase {
        kind: PhaseKind::OperandPadding,
        when: None,
        run: run_operand_padding,
    },
    Phase {
        kind: PhaseKind::HoistOutputPadding,
        when: Some(RESULT_UNALIGNED),
        run: run_hoist_output_padding,
    },
    Phase {
        kind: PhaseKind::Canonicalize,
        when: None,
        run: run_canonicalize,
    },
    Phase {
        kind: PhaseKind::DistributeCopies,
        when: None,
        run: run_distribute_copies,
    },
    Phase {
        kind: PhaseKind::WarpDistribution,
        when: None,
        run: run_warp_distribution,
    },
    Phase {
        kind: PhaseKind::Vectorize,
        when: None,
        run: run_vectorize,
    },
    Phase {
        kind: PhaseKind::Bufferize,
        when: None,
        run: run_bufferize,
    },
    Phase {
        kind: PhaseKind::MapToBlocksAndThreads,
        when: None,
        run: run_map_to_blocks_and_threads,
    },
    Phase {
        kind: PhaseKind::EliminateBarriers,
        when: None,
        run: run_eliminate_barriers,
    },
    Phase {
        kind: PhaseKind::TensorCoreConversion,
        when: None,
        run: run_tensor_core_conversion,
    },
    Phase {
        kind: PhaseKind::MultiBuffering,
        when: Some(PIPELINED_COPIES),
        run: run_multi_buffering,
    },
    Phase {
        kind: PhaseKind::AsyncCopies,
        when: Some(ASYNC_COPIES),
        run: run_async_copies,
    },
    Phase {
        kind: PhaseKind::SoftwarePipelining,
        when: Some(PIPELINED_COPIES),
        run: run_software_pipelining,
    },
    Phase {
        kind: PhaseKind::Cleanup,
        when: None,
        run: run_cleanup,
    },
];

const RESULT_UNALIGNED: Condition = Condition {
    description: "result not tile-aligned",
    holds: |s| !s.aligned_res(),
};

const ASYNC_COPIES: Condition = Condition {
    description: "use_async_copies",
    holds: |s| s.use_async_copies,
};

const PIPELINED_COPIES: Condition = Condition {
    description: "use_async_copies && pipeline_depth > 1",
    holds: |s| s.pipelines_copies(),
};

/// Phases that run for `strategy`, in order.
pub fn enabled_phases(strategy: &MatmulStrategy) -> Vec<PhaseKind> {
    PHASES
        .iter()
        .filter(|phase| phase.is_enabled(strategy))
        .map(|phase| phase.kind)
        .collect()
}

/// Handles threaded between phases.
#[derive(Clone, Debug, Default)]
struct PipelineHandles {
    variant: Option<Handle>,
    fill: Option<Handle>,
    matmul: Option<Handle>,
    // Carried until block distribution fuses it (see TODO there).
    #[allow(dead_code)]
    trailing: Option<Handle>,
    padded_matmul: Option<Handle>,
    /// Fill distributed with the matmul: the hoisted pad when hoisting ran,
    /// otherwise the fused accumulator init.
    compute_fill: Option<Handle>,
    copies: Option<DistributedCopies>,
    func: Option<Handle>,
}

fn need<T: Copy>(slot: Option<T>, name: &'static str) -> Result<T, TransformError> {
    slot.ok_or(TransformError::MissingHandle(name))
}

struct PhaseContext<'a> {
    lib: &'a mut dyn TransformLibrary,
    strategy: &'a MatmulStrategy,
    policy: &'a dyn MappingPolicy,
    handles: PipelineHandles,
}

impl PhaseContext<'_> {
    fn variant(&self) -> Result<Handle, TransformError> {
        need(self.handles.variant, "variant")
    }

    fn copy_mappings(&self) -> CopyMappings {
        CopyMappings {
            lhs: self.policy.copy_mapping(self.strategy, Operand::Lhs),
            rhs: self.policy.copy_mapping(self.strategy, Operand::Rhs),
            res: self.policy.copy_mapping(self.strategy, Operand::Res),
        }
    }
}

/// Build the tensor-core matmul strategy on `variant` with the default
/// mapping policy. Returns the handle to the lowered function.
pub fn build_matmul_tensor_core_strategy(
    lib: &mut dyn TransformLibrary,
    variant: Handle,
    strategy: &MatmulStrategy,
) -> Result<Handle, StrategyError> {
    build_with_policy(lib, variant, strategy, &TensorCorePolicy)
}

/// Build the strategy with a custom mapping policy.
pub fn build_with_policy(
    lib: &mut dyn TransformLibrary,
    variant: Handle,
    strategy: &MatmulStrategy,
    policy: &dyn MappingPolicy,
) -> Result<Handle, StrategyError> {
    strategy.validate().map_err(StrategyError::InvalidConfig)?;

    let _span = tracing::debug_span!("matmul_strategy", gpu = %strategy.target.name).entered();
    tracing::debug!("{}", strategy.display_with(policy));

    let mut cx = PhaseContext {
        lib,
        strategy,
        policy,
        handles: PipelineHandles {
            variant: Some(variant),
            ..Default::default()
        },
    };

    for phase in PHASES.iter() {
        if !phase.is_enabled(strategy) {
            tracing::trace!(phase = %phase.kind, "skipped");
            continue;
        }
        tracing::debug!(phase = %phase.kind, "running");
        (phase.run)(&mut cx).map_err(|source| StrategyError::Phase {
            phase: phase.kind,
            source,
        })?;
    }

    need(cx.handles.func, "func").map_err(|source| StrategyError::Phase {
        phase: PhaseKind::Cleanup,
        source,
    })
}

// --- Phase bodies ---

fn run_match(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    // Same matcher that selected the strategy, so it must apply.
    let variant = cx.variant()?;
    let matched = cx.lib.match_callback(MATMUL_MATCHER, variant)?;
    if matched.len() < 2 {
        return Err(TransformError::NoMatch {
            pattern: MATMUL_MATCHER.to_string(),
        });
    }
    cx.handles.fill = Some(matched[0]);
    cx.handles.matmul = Some(matched[1]);
    cx.handles.trailing = matched.get(2).copied();
    Ok(())
}

fn run_block_distribution(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    let matmul = need(cx.handles.matmul, "matmul")?;
    let fill = need(cx.handles.fill, "fill")?;
    let mapping = cx.policy.block_mapping(cx.strategy);

    // TODO: fuse the trailing elementwise op into the block-level forall.
    let tiled = cx.lib.tile_to_forall(variant, matmul, &[fill], &mapping)?;
    cx.lib.populate_workgroup_count(tiled.forall)?;

    let fused_fill = need(tiled.fused_ops.first().copied(), "fused fill")?;
    tracing::trace!(forall = ?tiled.forall, "block forall");
    cx.handles.matmul = Some(tiled.tiled_op);
    cx.handles.fill = Some(fused_fill);
    cx.handles.compute_fill = Some(fused_fill);
    Ok(())
}

fn run_reduction_tiling(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    let matmul = need(cx.handles.matmul, "matmul")?;
    let tile_sizes = [0, 0, cx.strategy.reduction_tile_size];
    // No canonicalization: it would fold away the output extract_slice the
    // hoist needs.
    let tiled = cx.lib.tile_to_loop(variant, matmul, &tile_sizes, false)?;
    cx.handles.matmul = Some(tiled.tiled_op);
    Ok(())
}

fn run_operand_padding(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let matmul = need(cx.handles.matmul, "matmul")?;
    let s = cx.strategy;
    let options = PadOptions {
        padding_values: &s.padding_values,
        padding_dimensions: &s.padding_dimensions,
        packing_dimensions: &s.packing_dimensions,
    };
    cx.handles.padded_matmul = Some(cx.lib.pad(matmul, &options)?);
    Ok(())
}

fn run_hoist_output_padding(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    let padded = need(cx.handles.padded_matmul, "padded matmul")?;
    cx.handles.compute_fill = Some(cx.lib.hoist_output_padding(variant, padded)?);
    Ok(())
}

fn run_canonicalize(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    // Turns aligned pads into plain copies.
    let variant = cx.variant()?;
    cx.lib.canonicalize(variant)
}

fn run_distribute_copies(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    let padded = need(cx.handles.padded_matmul, "padded matmul")?;
    let mappings = cx.copy_mappings();
    cx.handles.copies = Some(cx.lib.distribute_copies(variant, padded, &mappings)?);
    Ok(())
}

fn run_warp_distribution(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    let padded = need(cx.handles.padded_matmul, "padded matmul")?;
    let fill = need(cx.handles.compute_fill, "compute fill")?;
    let mapping = cx.policy.compute_mapping(cx.strategy);
    cx.lib.tile_to_forall_by_threads(variant, padded, &mapping)?;
    cx.lib.tile_to_forall_by_threads(variant, fill, &mapping)?;
    Ok(())
}

fn run_vectorize(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    let copies = need(cx.handles.copies, "distributed copies")?;
    let mappings = cx.copy_mappings();
    cx.lib.vectorize(variant, &copies, &mappings)
}

fn run_bufferize(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    let bufferized = cx.lib.bufferize(variant)?;
    // Everything acquired so far is stale; keep only the new variant.
    cx.handles = PipelineHandles {
        variant: Some(bufferized),
        ..Default::default()
    };
    Ok(())
}

fn run_map_to_blocks_and_threads(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let variant = cx.variant()?;
    // TODO: assumes a single function in the variant.
    let func = cx.lib.match_op(variant, FUNC_OP)?;
    let s = cx.strategy;
    let func = cx
        .lib
        .map_to_blocks_and_threads(func, &s.num_threads, &s.num_warps)?;
    cx.handles.func = Some(func);
    Ok(())
}

fn run_eliminate_barriers(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let func = need(cx.handles.func, "func")?;
    cx.handles.func = Some(cx.lib.eliminate_barriers(func)?);
    Ok(())
}

fn run_tensor_core_conversion(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let func = need(cx.handles.func, "func")?;
    let func = cx.lib.convert_to_tensor_core(func, cx.strategy.use_mma_sync)?;
    cx.handles.func = Some(func);
    Ok(())
}

fn run_multi_buffering(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let func = need(cx.handles.func, "func")?;
    cx.lib.multi_buffer(func, cx.strategy.pipeline_depth)
}

fn run_async_copies(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let func = need(cx.handles.func, "func")?;
    cx.handles.func = Some(cx.lib.convert_to_async_copies(func)?);
    Ok(())
}

fn run_software_pipelining(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let func = need(cx.handles.func, "func")?;
    let s = cx.strategy;
    cx.lib
        .pipeline_shared_memory_copies(func, s.pipeline_depth, s.use_mma_sync)
}

fn run_cleanup(cx: &mut PhaseContext<'_>) -> Result<(), TransformError> {
    let func = need(cx.handles.func, "func")?;
    cx.lib.lower_masks_and_cleanup(func)
}
