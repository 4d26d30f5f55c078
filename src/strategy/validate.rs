//! Internal consistency checks on a strategy configuration.

use std::fmt;

use super::MatmulStrategy;
use crate::diagnostic::Diagnostic;
use crate::span::Span;

/// Rank of the GPU launch grid every per-dimension tunable describes.
pub const GRID_RANK: usize = 3;

/// Loop dimensions of the matmul (m, n, k) that padding can target.
pub const MATMUL_LOOP_RANK: i64 = 3;

/// One violated constraint, keyed by the option that carries it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// Option key as written in a strategy file (e.g. `num_warps`).
    pub key: &'static str,
    pub message: String,
    pub help: Option<String>,
}

impl ValidationError {
    fn new(key: &'static str, message: String) -> Self {
        Self {
            key,
            message,
            help: None,
        }
    }

    fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    /// Convert into a diagnostic pointing at `span`.
    pub fn to_diagnostic(&self, span: Span) -> Diagnostic {
        let diag = Diagnostic::error(self.message.clone(), span)
            .with_note(format!("while validating `{}`", self.key));
        match &self.help {
            Some(help) => diag.with_help(help.clone()),
            None => diag,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

impl MatmulStrategy {
    /// Check the configuration is internally consistent.
    ///
    /// Reports every violation, not just the first. Never mutates.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let grid_vectors: [(&'static str, &[i64]); 3] = [
            ("block_tile_sizes", &self.block_tile_sizes),
            ("num_threads", &self.num_threads),
            ("num_warps", &self.num_warps),
        ];
        for (key, values) in grid_vectors {
            check_grid_vector(key, values, &mut errors);
        }

        if self.reduction_tile_size <= 0 {
            errors.push(ValidationError::new(
                "reduction_tile_size",
                format!(
                    "reduction tile size must be positive, got {}",
                    self.reduction_tile_size
                ),
            ));
        }

        if self.pipeline_depth < 0 {
            errors.push(ValidationError::new(
                "pipeline_depth",
                format!(
                    "pipeline depth must be non-negative, got {}",
                    self.pipeline_depth
                ),
            ));
        }

        let c = &self.captures;
        for (key, size) in [("m", c.m), ("n", c.n), ("k", c.k)] {
            if size <= 0 {
                errors.push(ValidationError::new(
                    key,
                    format!("problem size {} must be positive, got {}", key, size),
                ));
            }
        }

        // The remaining checks divide by tunables; only run them on
        // well-formed vectors.
        if errors.is_empty() {
            self.check_thread_counts(&mut errors);
            self.check_mma_shape(&mut errors);
        }

        self.check_target_features(&mut errors);
        self.check_padding(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn check_thread_counts(&self, errors: &mut Vec<ValidationError>) {
        let warp_size = self.target.warp_size;
        let Some(threads) = checked_product("num_threads", &self.num_threads, errors) else {
            return;
        };
        let Some(warps) = checked_product("num_warps", &self.num_warps, errors) else {
            return;
        };
        let Some(warp_threads) = warps.checked_mul(warp_size) else {
            errors.push(ValidationError::new(
                "num_warps",
                format!(
                    "{} warps of {} lanes overflow the thread count",
                    warps, warp_size
                ),
            ));
            return;
        };

        if threads != warp_threads {
            errors.push(
                ValidationError::new(
                    "num_threads",
                    format!(
                        "{} threads cannot form {} warps of {} lanes",
                        threads, warps, warp_size
                    ),
                )
                .with_help(format!(
                    "the product of num_threads must equal {} x the product of num_warps",
                    warp_size
                )),
            );
        }

        if self.num_threads[0] % warp_size != 0 {
            errors.push(ValidationError::new(
                "num_threads",
                format!(
                    "num_threads along x ({}) must be a multiple of the warp size ({})",
                    self.num_threads[0], warp_size
                ),
            ));
        }

        if threads > self.target.max_threads_per_block {
            errors.push(ValidationError::new(
                "num_threads",
                format!(
                    "{} threads exceed the {} limit of {} per block",
                    threads, self.target.name, self.target.max_threads_per_block
                ),
            ));
        }
    }

    fn check_mma_shape(&self, errors: &mut Vec<ValidationError>) {
        let shape = self
            .target
            .mma_shape(self.use_mma_sync, self.captures.lhs_element);
        let warps_y = self.num_warps_y();
        let warps_x = self.num_warps_x();

        if self.block_tile_m() % warps_y != 0 || self.block_tile_n() % warps_x != 0 {
            errors.push(ValidationError::new(
                "block_tile_sizes",
                format!(
                    "block tile {}x{} does not split evenly over {}x{} warps",
                    self.block_tile_m(),
                    self.block_tile_n(),
                    warps_y,
                    warps_x
                ),
            ));
            return;
        }

        let warp_tile_m = self.block_tile_m() / warps_y;
        let warp_tile_n = self.block_tile_n() / warps_x;
        if warp_tile_m % shape.m != 0 || warp_tile_n % shape.n != 0 {
            errors.push(
                ValidationError::new(
                    "block_tile_sizes",
                    format!(
                        "warp tile {}x{} is not a multiple of the {}x{} mma shape",
                        warp_tile_m, warp_tile_n, shape.m, shape.n
                    ),
                )
                .with_help("grow the block tile or use fewer warps".to_string()),
            );
        }

        if self.reduction_tile_size % shape.k != 0 {
            errors.push(ValidationError::new(
                "reduction_tile_size",
                format!(
                    "reduction tile size {} is not a multiple of the mma k extent {}",
                    self.reduction_tile_size, shape.k
                ),
            ));
        }
    }

    fn check_target_features(&self, errors: &mut Vec<ValidationError>) {
        if self.use_async_copies && !self.target.async_copy {
            errors.push(
                ValidationError::new(
                    "use_async_copies",
                    format!("target {} has no asynchronous copies", self.target.name),
                )
                .with_help("set use_async_copies = false".to_string()),
            );
        }
        if self.use_mma_sync && !self.target.mma_sync {
            errors.push(
                ValidationError::new(
                    "use_mma_sync",
                    format!("target {} has no synchronized mma form", self.target.name),
                )
                .with_help("set use_mma_sync = false".to_string()),
            );
        }
    }

    fn check_padding(&self, errors: &mut Vec<ValidationError>) {
        if self.padding_values.len() != 3 {
            errors.push(ValidationError::new(
                "padding_values",
                format!(
                    "expected one padding value per operand, got {}",
                    self.padding_values.len()
                ),
            ));
        }
        if self.padding_dimensions.len() != self.padding_values.len() {
            errors.push(ValidationError::new(
                "padding_dimensions",
                format!(
                    "expected {} padding dimensions, got {}",
                    self.padding_values.len(),
                    self.padding_dimensions.len()
                ),
            ));
        }
        if let Some(bad) = self
            .padding_dimensions
            .iter()
            .find(|&&d| !(0..MATMUL_LOOP_RANK).contains(&d))
        {
            errors.push(ValidationError::new(
                "padding_dimensions",
                format!(
                    "padding dimension {} is not a matmul loop (0..{})",
                    bad, MATMUL_LOOP_RANK
                ),
            ));
        }
        if self.packing_dimensions.len() != self.padding_values.len() {
            errors.push(ValidationError::new(
                "packing_dimensions",
                format!(
                    "expected {} packing flags, got {}",
                    self.padding_values.len(),
                    self.packing_dimensions.len()
                ),
            ));
        }
    }
}

/// Exact product of `values`, or an error keyed on `key` if it overflows.
fn checked_product(
    key: &'static str,
    values: &[i64],
    errors: &mut Vec<ValidationError>,
) -> Option<i64> {
    let product = values.iter().try_fold(1i64, |acc, &v| acc.checked_mul(v));
    if product.is_none() {
        errors.push(
            ValidationError::new(
                key,
                format!("product of {} [{}] overflows", key, super::join(values)),
            )
            .with_help("use per-dimension counts that fit a thread block".to_string()),
        );
    }
    product
}

fn check_grid_vector(key: &'static str, values: &[i64], errors: &mut Vec<ValidationError>) {
    if values.is_empty() {
        errors.push(ValidationError::new(key, format!("{} must not be empty", key)));
        return;
    }
    if values.len() != GRID_RANK {
        errors.push(
            ValidationError::new(
                key,
                format!(
                    "{} has {} entries, expected {}",
                    key,
                    values.len(),
                    GRID_RANK
                ),
            )
            .with_help("give one value per grid dimension (x, y, z)".to_string()),
        );
        return;
    }
    if let Some(bad) = values.iter().find(|&&v| v <= 0) {
        errors.push(ValidationError::new(
            key,
            format!("{} entries must be positive, got {}", key, bad),
        ));
    }
}
