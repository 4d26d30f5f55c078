//! Transform script recording.
//!
//! `ScriptBuilder` implements `TransformLibrary` by appending one
//! `TransformOp` per call. The finished `TransformScript` prints as a
//! transform sequence and can be fingerprinted for caching.

use std::fmt;

use super::{
    CopyMappings, DistributedCopies, Handle, HandleArena, PadOptions, TiledForall, TiledLoop,
    TransformError, TransformLibrary,
};
use crate::strategy::{MappingInfo, MappingTag};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpKind {
    MatchCallback,
    MatchOp,
    TileToForall,
    TileToForallByThreads,
    PopulateWorkgroupCount,
    TileToLoop,
    Pad,
    HoistOutputPadding,
    Canonicalize,
    DistributeCopies,
    Vectorize,
    Bufferize,
    MapToBlocksAndThreads,
    EliminateBarriers,
    ConvertToTensorCore,
    MultiBuffer,
    ConvertToAsyncCopies,
    PipelineSharedMemoryCopies,
    LowerMasksAndCleanup,
}

impl OpKind {
    pub fn name(self) -> &'static str {
        match self {
            OpKind::MatchCallback => "match_callback",
            OpKind::MatchOp => "match_op",
            OpKind::TileToForall => "tile_to_forall",
            OpKind::TileToForallByThreads => "tile_to_forall_by_threads",
            OpKind::PopulateWorkgroupCount => "populate_workgroup_count",
            OpKind::TileToLoop => "tile_to_loop",
            OpKind::Pad => "pad",
            OpKind::HoistOutputPadding => "hoist_output_padding",
            OpKind::Canonicalize => "canonicalize",
            OpKind::DistributeCopies => "distribute_copies",
            OpKind::Vectorize => "vectorize",
            OpKind::Bufferize => "bufferize",
            OpKind::MapToBlocksAndThreads => "map_to_blocks_and_threads",
            OpKind::EliminateBarriers => "eliminate_barriers",
            OpKind::ConvertToTensorCore => "convert_to_tensor_core",
            OpKind::MultiBuffer => "multi_buffer",
            OpKind::ConvertToAsyncCopies => "convert_to_async_copies",
            OpKind::PipelineSharedMemoryCopies => "pipeline_shared_memory_copies",
            OpKind::LowerMasksAndCleanup => "lower_masks_and_cleanup",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded library call.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformOp {
    pub kind: OpKind,
    pub operands: Vec<Handle>,
    pub results: Vec<Handle>,
    pub attrs: Vec<(&'static str, String)>,
}

impl fmt::Display for TransformOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.results.is_empty() {
            write!(f, "{} = ", join(&self.results))?;
        }
        write!(f, "{}", self.kind)?;
        if !self.operands.is_empty() {
            write!(f, " {}", join(&self.operands))?;
        }
        if !self.attrs.is_empty() {
            let attrs: Vec<String> = self
                .attrs
                .iter()
                .map(|(k, v)| format!("{} = {}", k, v))
                .collect();
            write!(f, " {{{}}}", attrs.join(", "))?;
        }
        Ok(())
    }
}

/// A finished, ordered transform sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct TransformScript {
    pub root: Handle,
    pub ops: Vec<TransformOp>,
}

impl TransformScript {
    pub fn kinds(&self) -> Vec<OpKind> {
        self.ops.iter().map(|op| op.kind).collect()
    }

    pub fn count(&self, kind: OpKind) -> usize {
        self.ops.iter().filter(|op| op.kind == kind).count()
    }

    /// Index of the first op of `kind`.
    pub fn position(&self, kind: OpKind) -> Option<usize> {
        self.ops.iter().position(|op| op.kind == kind)
    }

    /// BLAKE3 hash of the printed script, hex encoded.
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.to_string().as_bytes()).to_hex().to_string()
    }

    /// First 16 hex digits of the fingerprint.
    pub fn short_fingerprint(&self) -> String {
        self.fingerprint()[..16].to_string()
    }
}

impl fmt::Display for TransformScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "sequence {} {{", self.root)?;
        for op in &self.ops {
            writeln!(f, "  {}", op)?;
        }
        write!(f, "}}")
    }
}

/// Records library calls into a `TransformScript`.
pub struct ScriptBuilder {
    arena: HandleArena,
    root: Handle,
    ops: Vec<TransformOp>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        let mut arena = HandleArena::new();
        let root = arena.fresh();
        Self {
            arena,
            root,
            ops: Vec::new(),
        }
    }

    /// Handle to the payload variant the sequence runs on.
    pub fn root(&self) -> Handle {
        self.root
    }

    pub fn ops(&self) -> &[TransformOp] {
        &self.ops
    }

    pub fn finish(self) -> TransformScript {
        TransformScript {
            root: self.root,
            ops: self.ops,
        }
    }

    fn emit(
        &mut self,
        kind: OpKind,
        operands: &[Handle],
        num_results: usize,
        attrs: Vec<(&'static str, String)>,
    ) -> Result<Vec<Handle>, TransformError> {
        for &operand in operands {
            self.arena.check(operand)?;
        }
        let results: Vec<Handle> = (0..num_results).map(|_| self.arena.fresh()).collect();
        let op = TransformOp {
            kind,
            operands: operands.to_vec(),
            results: results.clone(),
            attrs,
        };
        tracing::trace!("emit {}", op);
        self.ops.push(op);
        Ok(results)
    }

    fn emit_one(
        &mut self,
        kind: OpKind,
        operands: &[Handle],
        attrs: Vec<(&'static str, String)>,
    ) -> Result<Handle, TransformError> {
        let results = self.emit(kind, operands, 1, attrs)?;
        Ok(results[0])
    }
}

impl Default for ScriptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn list<T: fmt::Display>(items: &[T]) -> String {
    format!("[{}]", join(items))
}

fn float_list(values: &[f32]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
    format!("[{}]", items.join(", "))
}

fn mapping_attr(tags: &[MappingTag]) -> String {
    list(tags)
}

fn copy_attr(mapping: &MappingInfo) -> String {
    format!(
        "{}x{}",
        list(&mapping.num_threads),
        mapping.vector_size.unwrap_or(1)
    )
}

impl TransformLibrary for ScriptBuilder {
    fn match_callback(&mut self, name: &str, root: Handle) -> Result<Vec<Handle>, TransformError> {
        // fill, matmul, trailing
        self.emit(
            OpKind::MatchCallback,
            &[root],
            3,
            vec![("name", format!("{:?}", name))],
        )
    }

    fn match_op(&mut self, root: Handle, op_name: &str) -> Result<Handle, TransformError> {
        self.emit_one(
            OpKind::MatchOp,
            &[root],
            vec![("ops", format!("{:?}", op_name))],
        )
    }

    fn tile_to_forall(
        &mut self,
        parent: Handle,
        target: Handle,
        fuse: &[Handle],
        mapping: &MappingInfo,
    ) -> Result<TiledForall, TransformError> {
        if mapping.tile_sizes.len() != mapping.thread_mapping.len() {
            return Err(TransformError::Inapplicable {
                op: "tile_to_forall",
                reason: format!(
                    "{} tile sizes for {} mapped dims",
                    mapping.tile_sizes.len(),
                    mapping.thread_mapping.len()
                ),
            });
        }
        let mut operands = vec![parent, target];
        operands.extend_from_slice(fuse);
        let results = self.emit(
            OpKind::TileToForall,
            &operands,
            2 + fuse.len(),
            vec![
                ("tile_sizes", list(&mapping.tile_sizes)),
                ("mapping", mapping_attr(&mapping.thread_mapping)),
            ],
        )?;
        Ok(TiledForall {
            forall: results[0],
            tiled_op: results[1],
            fused_ops: results[2..].to_vec(),
        })
    }

    fn tile_to_forall_by_threads(
        &mut self,
        parent: Handle,
        target: Handle,
        mapping: &MappingInfo,
    ) -> Result<TiledForall, TransformError> {
        if mapping.num_threads.len() != mapping.thread_mapping.len() {
            return Err(TransformError::Inapplicable {
                op: "tile_to_forall_by_threads",
                reason: format!(
                    "{} thread counts for {} mapped dims",
                    mapping.num_threads.len(),
                    mapping.thread_mapping.len()
                ),
            });
        }
        let results = self.emit(
            OpKind::TileToForallByThreads,
            &[parent, target],
            2,
            vec![
                ("num_threads", list(&mapping.num_threads)),
                ("mapping", mapping_attr(&mapping.thread_mapping)),
            ],
        )?;
        Ok(TiledForall {
            forall: results[0],
            tiled_op: results[1],
            fused_ops: Vec::new(),
        })
    }

    fn populate_workgroup_count(&mut self, forall: Handle) -> Result<(), TransformError> {
        self.emit(OpKind::PopulateWorkgroupCount, &[forall], 0, Vec::new())?;
        Ok(())
    }

    fn tile_to_loop(
        &mut self,
        parent: Handle,
        target: Handle,
        tile_sizes: &[i64],
        canonicalize: bool,
    ) -> Result<TiledLoop, TransformError> {
        if tile_sizes.iter().all(|&t| t == 0) {
            return Err(TransformError::Inapplicable {
                op: "tile_to_loop",
                reason: "every tile size is zero".to_string(),
            });
        }
        let results = self.emit(
            OpKind::TileToLoop,
            &[parent, target],
            2,
            vec![
                ("tile_sizes", list(tile_sizes)),
                ("canonicalize", canonicalize.to_string()),
            ],
        )?;
        Ok(TiledLoop {
            loop_op: results[0],
            tiled_op: results[1],
        })
    }

    fn pad(&mut self, target: Handle, options: &PadOptions<'_>) -> Result<Handle, TransformError> {
        if options.padding_values.is_empty() {
            return Err(TransformError::Inapplicable {
                op: "pad",
                reason: "no padding values".to_string(),
            });
        }
        self.emit_one(
            OpKind::Pad,
            &[target],
            vec![
                ("padding_values", float_list(options.padding_values)),
                ("padding_dimensions", list(options.padding_dimensions)),
                ("pack_paddings", list(options.packing_dimensions)),
            ],
        )
    }

    fn hoist_output_padding(
        &mut self,
        parent: Handle,
        padded: Handle,
    ) -> Result<Handle, TransformError> {
        self.emit_one(OpKind::HoistOutputPadding, &[parent, padded], Vec::new())
    }

    fn canonicalize(&mut self, parent: Handle) -> Result<(), TransformError> {
        self.emit(OpKind::Canonicalize, &[parent], 0, Vec::new())?;
        Ok(())
    }

    fn distribute_copies(
        &mut self,
        parent: Handle,
        padded: Handle,
        mappings: &CopyMappings,
    ) -> Result<DistributedCopies, TransformError> {
        let results = self.emit(
            OpKind::DistributeCopies,
            &[parent, padded],
            3,
            vec![
                ("lhs", list(&mappings.lhs.num_threads)),
                ("rhs", list(&mappings.rhs.num_threads)),
                ("res", list(&mappings.res.num_threads)),
            ],
        )?;
        Ok(DistributedCopies {
            lhs: results[0],
            rhs: results[1],
            copy_back: results[2],
        })
    }

    fn vectorize(
        &mut self,
        parent: Handle,
        copies: &DistributedCopies,
        mappings: &CopyMappings,
    ) -> Result<(), TransformError> {
        self.emit(
            OpKind::Vectorize,
            &[parent, copies.lhs, copies.rhs, copies.copy_back],
            0,
            vec![
                ("lhs", copy_attr(&mappings.lhs)),
                ("rhs", copy_attr(&mappings.rhs)),
                ("res", copy_attr(&mappings.res)),
            ],
        )?;
        Ok(())
    }

    fn bufferize(&mut self, variant: Handle) -> Result<Handle, TransformError> {
        self.arena.check(variant)?;
        self.arena.invalidate_all();
        let result = self.arena.fresh();
        self.ops.push(TransformOp {
            kind: OpKind::Bufferize,
            operands: vec![variant],
            results: vec![result],
            attrs: Vec::new(),
        });
        Ok(result)
    }

    fn map_to_blocks_and_threads(
        &mut self,
        func: Handle,
        num_threads: &[i64],
        num_warps: &[i64],
    ) -> Result<Handle, TransformError> {
        self.emit_one(
            OpKind::MapToBlocksAndThreads,
            &[func],
            vec![
                ("block_dims", list(num_threads)),
                ("warp_dims", list(num_warps)),
            ],
        )
    }

    fn eliminate_barriers(&mut self, func: Handle) -> Result<Handle, TransformError> {
        self.emit_one(OpKind::EliminateBarriers, &[func], Vec::new())
    }

    fn convert_to_tensor_core(
        &mut self,
        func: Handle,
        use_mma_sync: bool,
    ) -> Result<Handle, TransformError> {
        let form = if use_mma_sync { "mma_sync" } else { "wmma" };
        self.emit_one(
            OpKind::ConvertToTensorCore,
            &[func],
            vec![("form", form.to_string())],
        )
    }

    fn multi_buffer(&mut self, func: Handle, depth: i64) -> Result<(), TransformError> {
        if depth < 2 {
            return Err(TransformError::Inapplicable {
                op: "multi_buffer",
                reason: format!("depth {} leaves nothing to overlap", depth),
            });
        }
        self.emit(
            OpKind::MultiBuffer,
            &[func],
            0,
            vec![("factor", depth.to_string())],
        )?;
        Ok(())
    }

    fn convert_to_async_copies(&mut self, func: Handle) -> Result<Handle, TransformError> {
        self.emit_one(OpKind::ConvertToAsyncCopies, &[func], Vec::new())
    }

    fn pipeline_shared_memory_copies(
        &mut self,
        func: Handle,
        depth: i64,
        use_mma_sync: bool,
    ) -> Result<(), TransformError> {
        self.emit(
            OpKind::PipelineSharedMemoryCopies,
            &[func],
            0,
            vec![
                ("depth", depth.to_string()),
                ("use_mma_sync", use_mma_sync.to_string()),
            ],
        )?;
        Ok(())
    }

    fn lower_masks_and_cleanup(&mut self, func: Handle) -> Result<(), TransformError> {
        self.emit(OpKind::LowerMasksAndCleanup, &[func], 0, Vec::new())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{Axis, MappingTag};

    fn block_mapping() -> MappingInfo {
        MappingInfo {
            num_threads: Vec::new(),
            tile_sizes: vec![128, 128],
            thread_mapping: vec![MappingTag::block(Axis::Y), MappingTag::block(Axis::X)],
            vector_size: None,
        }
    }

    #[test]
    fn test_records_ops_in_order() {
        let mut b = ScriptBuilder::new();
        let root = b.root();
        let matched = b.match_callback("matmul", root).unwrap();
        assert_eq!(matched.len(), 3);
        b.canonicalize(root).unwrap();
        let script = b.finish();
        assert_eq!(script.kinds(), vec![OpKind::MatchCallback, OpKind::Canonicalize]);
        assert_eq!(
            script.ops[0].to_string(),
            "%1, %2, %3 = match_callback %0 {name = \"matmul\"}"
        );
    }

    #[test]
    fn test_tile_to_forall_returns_fused_handles() {
        let mut b = ScriptBuilder::new();
        let root = b.root();
        let matched = b.match_callback("matmul", root).unwrap();
        let tiled = b
            .tile_to_forall(root, matched[1], &matched[..1], &block_mapping())
            .unwrap();
        assert_eq!(tiled.fused_ops.len(), 1);
        assert_ne!(tiled.fused_ops[0], matched[0]);
        assert_eq!(
            b.ops()[1].to_string(),
            "%4, %5, %6 = tile_to_forall %0, %2, %1 {tile_sizes = [128, 128], mapping = [block.y, block.x]}"
        );
    }

    #[test]
    fn test_bufferize_invalidates_handles() {
        let mut b = ScriptBuilder::new();
        let root = b.root();
        let matched = b.match_callback("matmul", root).unwrap();
        let variant = b.bufferize(root).unwrap();

        let err = b.canonicalize(matched[1]).unwrap_err();
        assert!(matches!(err, TransformError::StaleHandle { .. }));
        assert!(b.canonicalize(root).is_err());

        let func = b.match_op(variant, "func.func").unwrap();
        assert!(b.eliminate_barriers(func).is_ok());
    }

    #[test]
    fn test_inapplicable_calls_are_reported() {
        let mut b = ScriptBuilder::new();
        let root = b.root();
        let err = b.tile_to_loop(root, root, &[0, 0, 0], false).unwrap_err();
        assert!(err.to_string().contains("every tile size is zero"));

        let err = b.multi_buffer(root, 1).unwrap_err();
        assert!(matches!(err, TransformError::Inapplicable { op: "multi_buffer", .. }));

        let mut bad = block_mapping();
        bad.tile_sizes.pop();
        assert!(b.tile_to_forall(root, root, &[], &bad).is_err());
        assert!(b.ops().is_empty());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let build = || {
            let mut b = ScriptBuilder::new();
            let root = b.root();
            b.canonicalize(root).unwrap();
            b.finish()
        };
        let a = build();
        assert_eq!(a.fingerprint(), build().fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
        assert_eq!(a.short_fingerprint().len(), 16);

        let mut b = ScriptBuilder::new();
        let root = b.root();
        b.lower_masks_and_cleanup(root).unwrap();
        assert_ne!(a.fingerprint(), b.finish().fingerprint());
    }

    #[test]
    fn test_script_display() {
        let mut b = ScriptBuilder::new();
        let root = b.root();
        let func = b.match_op(root, "func.func").unwrap();
        b.convert_to_tensor_core(func, false).unwrap();
        assert_eq!(
            b.finish().to_string(),
            "sequence %0 {\n  %1 = match_op %0 {ops = \"func.func\"}\n  %2 = convert_to_tensor_core %1 {form = wmma}\n}"
        );
    }
}
