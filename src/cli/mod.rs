pub mod build;
pub mod phases;
pub mod show;
pub mod sweep;

use std::path::{Path, PathBuf};
use std::process;

use clap::Args;

use tcgen::diagnostic::{render_diagnostics, Diagnostic};
use tcgen::file::StrategyFile;
use tcgen::strategy::ElementType;
use tcgen::{MatmulStrategy, ProblemOverrides, StrategyOverrides, StrategyRequest};

/// Configuration flags shared by every subcommand.
///
/// Precedence: compiled-in defaults < `--config` file < these flags.
#[derive(Args, Clone, Debug, Default)]
pub struct StrategyArgs {
    /// Strategy file with [strategy], [problem] and [target] sections
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// GPU target (sm_70, sm_75, sm_80, sm_86, sm_90 or targets/<name>.toml)
    #[arg(long)]
    pub target: Option<String>,
    /// Problem size
    #[arg(long, value_name = "MxNxK", value_parser = parse_problem)]
    pub problem: Option<(i64, i64, i64)>,
    /// Element type of the lhs operand
    #[arg(long, value_parser = parse_element)]
    pub lhs_element: Option<ElementType>,
    /// Element type of the rhs operand
    #[arg(long, value_parser = parse_element)]
    pub rhs_element: Option<ElementType>,
    /// Element type of the result
    #[arg(long, value_parser = parse_element)]
    pub res_element: Option<ElementType>,
    /// Block-level tile sizes (x,y,z)
    #[arg(long, value_delimiter = ',', value_name = "X,Y,Z")]
    pub blk_sizes: Option<Vec<i64>>,
    /// Reduction tile size
    #[arg(long)]
    pub reduc_size: Option<i64>,
    /// Threads per dimension at the compute stage (x,y,z)
    #[arg(long, value_delimiter = ',', value_name = "X,Y,Z")]
    pub num_threads: Option<Vec<i64>>,
    /// Warps per dimension (x,y,z)
    #[arg(long, value_delimiter = ',', value_name = "X,Y,Z")]
    pub num_warps: Option<Vec<i64>>,
    /// Use asynchronous global-to-shared copies
    #[arg(long, value_name = "BOOL")]
    pub use_async_copies: Option<bool>,
    /// Use the synchronized mma instruction form
    #[arg(long, value_name = "BOOL")]
    pub use_mma_sync: Option<bool>,
    /// Multi-buffering and software pipelining depth
    #[arg(long, allow_negative_numbers = true)]
    pub pipeline_depth: Option<i64>,
}

impl StrategyArgs {
    fn overrides(&self) -> StrategyOverrides {
        StrategyOverrides {
            block_tile_sizes: self.blk_sizes.clone(),
            reduction_tile_size: self.reduc_size,
            num_threads: self.num_threads.clone(),
            num_warps: self.num_warps.clone(),
            use_async_copies: self.use_async_copies,
            use_mma_sync: self.use_mma_sync,
            pipeline_depth: self.pipeline_depth,
        }
    }

    fn problem(&self) -> ProblemOverrides {
        let (m, n, k) = match self.problem {
            Some((m, n, k)) => (Some(m), Some(n), Some(k)),
            None => (None, None, None),
        };
        ProblemOverrides {
            m,
            n,
            k,
            lhs_element: self.lhs_element,
            rhs_element: self.rhs_element,
            res_element: self.res_element,
        }
    }
}

fn parse_problem(s: &str) -> Result<(i64, i64, i64), String> {
    let dims: Vec<&str> = s.split('x').collect();
    if dims.len() != 3 {
        return Err(format!("expected MxNxK, got '{}'", s));
    }
    let dim = |d: &str| {
        d.trim()
            .parse::<i64>()
            .map_err(|_| format!("invalid problem dimension '{}'", d))
    };
    Ok((dim(dims[0])?, dim(dims[1])?, dim(dims[2])?))
}

fn parse_element(s: &str) -> Result<ElementType, String> {
    ElementType::parse(s).ok_or_else(|| format!("unknown element type '{}'", s))
}

fn load_file(path: &Path) -> StrategyFile {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", path.display(), e);
            process::exit(1);
        }
    };
    match StrategyFile::parse(source.clone(), path) {
        Ok(file) => file,
        Err(diag) => {
            diag.render(&path.display().to_string(), &source);
            process::exit(1);
        }
    }
}

/// Resolve the strategy from defaults, the optional file and the flags.
/// Exits on any configuration error.
pub fn resolve_strategy(args: &StrategyArgs) -> (MatmulStrategy, Option<StrategyFile>) {
    let file = args.config.as_deref().map(load_file);
    let request = StrategyRequest {
        file: file.as_ref(),
        overrides: args.overrides(),
        problem: args.problem(),
        target: args.target.clone(),
    };
    match tcgen::resolve_strategy(&request) {
        Ok(strategy) => (strategy, file),
        Err(diag) => {
            diag.render("", "");
            process::exit(1);
        }
    }
}

/// Validate `strategy`, printing every violation and exiting on failure.
pub fn validate_or_exit(strategy: &MatmulStrategy, file: Option<&StrategyFile>) {
    if let Err(diags) = tcgen::check_strategy(strategy, file) {
        render_errors(&diags, file);
        process::exit(1);
    }
}

pub fn render_errors(diags: &[Diagnostic], file: Option<&StrategyFile>) {
    match file {
        Some(f) => render_diagnostics(diags, &f.filename(), &f.source),
        None => render_diagnostics(diags, "", ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_problem() {
        assert_eq!(parse_problem("1024x512x64"), Ok((1024, 512, 64)));
        assert!(parse_problem("1024x512").is_err());
        assert!(parse_problem("axbxc").is_err());
    }

    #[test]
    fn test_flags_map_to_overrides() {
        let args = StrategyArgs {
            blk_sizes: Some(vec![64, 64, 1]),
            use_mma_sync: Some(false),
            problem: Some((256, 128, 64)),
            lhs_element: Some(ElementType::F16),
            ..Default::default()
        };
        let overrides = args.overrides();
        assert_eq!(overrides.block_tile_sizes, Some(vec![64, 64, 1]));
        assert_eq!(overrides.use_mma_sync, Some(false));
        assert_eq!(overrides.pipeline_depth, None);
        let problem = args.problem();
        assert_eq!((problem.m, problem.n, problem.k), (Some(256), Some(128), Some(64)));
        assert_eq!(problem.lhs_element, Some(ElementType::F16));
    }
}
