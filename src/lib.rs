pub mod api;
pub mod config;
pub mod diagnostic;
pub mod pipeline;
pub mod span;
pub mod strategy;
pub mod transform;

// Re-exports — short `tcgen::X` paths used by the CLI and tests
pub use config::file;
pub use config::target;
pub use pipeline::{build_matmul_tensor_core_strategy, build_with_policy, StrategyError};
pub use strategy::{MatmulCaptures, MatmulStrategy, ProblemOverrides, StrategyOverrides};
pub use transform::{ScriptBuilder, TransformLibrary, TransformScript};

pub use api::*;
