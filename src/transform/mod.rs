//! Transformation library interface.
//!
//! The strategy never rewrites payload IR itself: it drives a library of
//! primitive transformations through handles. `TransformLibrary` is that
//! seam; `ScriptBuilder` is the implementation that records each call as
//! one op of a transform script for a downstream interpreter.
//!
//! ```text
//! strategy ─→ pipeline (phases) ─→ TransformLibrary ─→ ScriptBuilder → TransformScript
//!                                                   └→ any other implementation
//! ```

mod handle;
pub mod script;

pub use handle::{Handle, HandleArena};
pub use script::{OpKind, ScriptBuilder, TransformOp, TransformScript};

use crate::strategy::MappingInfo;

/// Failure reported by a transformation library call.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("no payload op matches `{pattern}`")]
    NoMatch { pattern: String },
    #[error("handle {handle} is stale (generation {generation}, current {current})")]
    StaleHandle {
        handle: String,
        generation: u32,
        current: u32,
    },
    #[error("`{op}` does not apply: {reason}")]
    Inapplicable { op: &'static str, reason: String },
    #[error("no earlier phase produced the {0} handle")]
    MissingHandle(&'static str),
}

/// Result of tiling an op into an `scf.forall`-like parallel construct.
#[derive(Clone, Debug, PartialEq)]
pub struct TiledForall {
    pub forall: Handle,
    pub tiled_op: Handle,
    /// One handle per op fused into the construct, in request order.
    pub fused_ops: Vec<Handle>,
}

/// Result of tiling an op into a sequential loop.
#[derive(Clone, Debug, PartialEq)]
pub struct TiledLoop {
    pub loop_op: Handle,
    pub tiled_op: Handle,
}

/// Per-operand padding configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PadOptions<'a> {
    pub padding_values: &'a [f32],
    pub padding_dimensions: &'a [i64],
    pub packing_dimensions: &'a [i64],
}

/// Copy mappings for the three matmul operands.
#[derive(Clone, Debug, PartialEq)]
pub struct CopyMappings {
    pub lhs: MappingInfo,
    pub rhs: MappingInfo,
    pub res: MappingInfo,
}

/// Handles to the distributed operand copies and the result copy-back.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistributedCopies {
    pub lhs: Handle,
    pub rhs: Handle,
    pub copy_back: Handle,
}

/// Primitive transformations the strategy is built from.
///
/// Every call may fail; implementations must report failures rather than
/// silently skip the transformation.
pub trait TransformLibrary {
    /// Run the registered matcher `name` under `root`; returns the captured
    /// handles in matcher order.
    fn match_callback(&mut self, name: &str, root: Handle) -> Result<Vec<Handle>, TransformError>;

    /// Match every op named `op_name` under `root`.
    fn match_op(&mut self, root: Handle, op_name: &str) -> Result<Handle, TransformError>;

    /// Tile `target` by tile sizes into a parallel construct, fusing `fuse`.
    fn tile_to_forall(
        &mut self,
        parent: Handle,
        target: Handle,
        fuse: &[Handle],
        mapping: &MappingInfo,
    ) -> Result<TiledForall, TransformError>;

    /// Tile `target` by thread counts into a parallel construct.
    fn tile_to_forall_by_threads(
        &mut self,
        parent: Handle,
        target: Handle,
        mapping: &MappingInfo,
    ) -> Result<TiledForall, TransformError>;

    /// Fill the workgroup count region from the construct's thread counts.
    fn populate_workgroup_count(&mut self, forall: Handle) -> Result<(), TransformError>;

    /// Tile `target` into a sequential loop.
    fn tile_to_loop(
        &mut self,
        parent: Handle,
        target: Handle,
        tile_sizes: &[i64],
        canonicalize: bool,
    ) -> Result<TiledLoop, TransformError>;

    fn pad(&mut self, target: Handle, options: &PadOptions<'_>) -> Result<Handle, TransformError>;

    /// Hoist the output pad of `padded` above its reduction loop; returns
    /// the hoisted fill.
    fn hoist_output_padding(
        &mut self,
        parent: Handle,
        padded: Handle,
    ) -> Result<Handle, TransformError>;

    fn canonicalize(&mut self, parent: Handle) -> Result<(), TransformError>;

    fn distribute_copies(
        &mut self,
        parent: Handle,
        padded: Handle,
        mappings: &CopyMappings,
    ) -> Result<DistributedCopies, TransformError>;

    fn vectorize(
        &mut self,
        parent: Handle,
        copies: &DistributedCopies,
        mappings: &CopyMappings,
    ) -> Result<(), TransformError>;

    /// Convert tensors to buffers. Invalidates every existing handle and
    /// returns the new variant handle.
    fn bufferize(&mut self, variant: Handle) -> Result<Handle, TransformError>;

    fn map_to_blocks_and_threads(
        &mut self,
        func: Handle,
        num_threads: &[i64],
        num_warps: &[i64],
    ) -> Result<Handle, TransformError>;

    fn eliminate_barriers(&mut self, func: Handle) -> Result<Handle, TransformError>;

    fn convert_to_tensor_core(
        &mut self,
        func: Handle,
        use_mma_sync: bool,
    ) -> Result<Handle, TransformError>;

    fn multi_buffer(&mut self, func: Handle, depth: i64) -> Result<(), TransformError>;

    fn convert_to_async_copies(&mut self, func: Handle) -> Result<Handle, TransformError>;

    fn pipeline_shared_memory_copies(
        &mut self,
        func: Handle,
        depth: i64,
        use_mma_sync: bool,
    ) -> Result<(), TransformError>;

    fn lower_masks_and_cleanup(&mut self, func: Handle) -> Result<(), TransformError>;
}
