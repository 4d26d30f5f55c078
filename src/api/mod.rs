//! Library entry points used by the CLI and by embedders.
//!
//! Configuration is layered `defaults < strategy file < explicit overrides`,
//! validated, and only then turned into a transform script.

use rayon::prelude::*;

use crate::config::file::StrategyFile;
use crate::config::target::GpuTarget;
use crate::diagnostic::Diagnostic;
use crate::pipeline::{build_matmul_tensor_core_strategy, StrategyError};
use crate::span::Span;
use crate::strategy::{MatmulCaptures, MatmulStrategy, ProblemOverrides, StrategyOverrides};
use crate::transform::{ScriptBuilder, TransformScript};


/// Configuration layers above the compiled-in defaults.
#[derive(Clone, Debug, Default)]
pub struct StrategyRequest<'a> {
    pub file: Option<&'a StrategyFile>,
    pub overrides: StrategyOverrides,
    pub problem: ProblemOverrides,
    /// Target name; falls back to the file's `[target]`, then `sm_80`.
    pub target: Option<String>,
}

/// Assemble a strategy from its configuration layers. Does not validate.
pub fn resolve_strategy(request: &StrategyRequest<'_>) -> Result<MatmulStrategy, Diagnostic> {
    let (file_overrides, file_problem, file_target) = match request.file {
        Some(f) => (f.overrides.clone(), f.problem, f.target.clone()),
        None => Default::default(),
    };

    let target = match request.target.as_deref().or(file_target.as_deref()) {
        Some(name) => GpuTarget::resolve(name)?,
        None => GpuTarget::default(),
    };
    let overrides = file_overrides.merge(&request.overrides);
    let captures = file_problem
        .merge(&request.problem)
        .apply(MatmulCaptures::default());

    Ok(MatmulStrategy::new(captures, target, &overrides))
}

/// Validate `strategy`, anchoring errors in `file` when one was used.
pub fn check_strategy(
    strategy: &MatmulStrategy,
    file: Option<&StrategyFile>,
) -> Result<(), Vec<Diagnostic>> {
    strategy.validate().map_err(|errors| match file {
        Some(f) => f.diagnostics(&errors),
        None => errors
            .iter()
            .map(|e| e.to_diagnostic(Span::dummy()))
            .collect(),
    })
}

/// Build the transform script for `strategy`.
pub fn build_script(strategy: &MatmulStrategy) -> Result<TransformScript, StrategyError> {
    let mut builder = ScriptBuilder::new();
    let root = builder.root();
    build_matmul_tensor_core_strategy(&mut builder, root, strategy)?;
    Ok(builder.finish())
}

/// One configuration of a parameter sweep.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepPoint {
    pub block_tile: (i64, i64),
    pub reduction_tile_size: i64,
    pub pipeline_depth: i64,
}

impl SweepPoint {
    fn overrides(&self) -> StrategyOverrides {
        StrategyOverrides {
            block_tile_sizes: Some(vec![self.block_tile.0, self.block_tile.1, 1]),
            reduction_tile_size: Some(self.reduction_tile_size),
            pipeline_depth: Some(self.pipeline_depth),
            ..Default::default()
        }
    }
}

/// Outcome of building one sweep point.
#[derive(Clone, Debug)]
pub struct SweepResult {
    pub point: SweepPoint,
    /// Number of recorded ops and the script fingerprint, or why the
    /// configuration was rejected.
    pub outcome: Result<(usize, String), String>,
}

/// Cartesian product of square block tiles, reduction tiles and depths.
pub fn sweep_grid(block_tiles: &[i64], reductions: &[i64], depths: &[i64]) -> Vec<SweepPoint> {
    let mut points = Vec::new();
    for &m in block_tiles {
        for &n in block_tiles {
            for &reduction_tile_size in reductions {
                for &pipeline_depth in depths {
                    points.push(SweepPoint {
                        block_tile: (m, n),
                        reduction_tile_size,
                        pipeline_depth,
                    });
                }
            }
        }
    }
    points
}

/// Build every point on top of `base` in parallel. Results keep the order
/// of `points`.
pub fn sweep(base: &MatmulStrategy, points: &[SweepPoint]) -> Vec<SweepResult> {
    let base_overrides = StrategyOverrides {
        num_threads: Some(base.num_threads.clone()),
        num_warps: Some(base.num_warps.clone()),
        use_async_copies: Some(base.use_async_copies),
        use_mma_sync: Some(base.use_mma_sync),
        ..Default::default()
    };

    points
        .par_iter()
        .map(|point| {
            let overrides = base_overrides.clone().merge(&point.overrides());
            let strategy = MatmulStrategy::new(base.captures, base.target.clone(), &overrides);
            let outcome = build_script(&strategy)
                .map(|script| (script.ops.len(), script.short_fingerprint()))
                .map_err(|e| e.to_string());
            tracing::debug!(?point, ok = outcome.is_ok(), "sweep point");
            SweepResult {
                point: point.clone(),
                outcome,
            }
        })
        .collect()
}
