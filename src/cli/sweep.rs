use std::process;

use clap::Args;

use tcgen::diagnostic::Diagnostic;
use tcgen::span::Span;
use tcgen::{sweep, sweep_grid};

use super::{resolve_strategy, StrategyArgs};

#[derive(Args)]
pub struct SweepArgs {
    #[command(flatten)]
    pub strategy: StrategyArgs,
    /// Block tile extents tried for both M and N
    #[arg(long, value_delimiter = ',', default_value = "64,128,256")]
    pub tiles: Vec<i64>,
    /// Reduction tile sizes
    #[arg(long, value_delimiter = ',', default_value = "16,32")]
    pub reductions: Vec<i64>,
    /// Pipeline depths
    #[arg(long, value_delimiter = ',', default_value = "1,2,3,4")]
    pub depths: Vec<i64>,
    /// Only print configurations that build
    #[arg(long)]
    pub valid_only: bool,
}

pub fn cmd_sweep(args: SweepArgs) {
    let (base, _) = resolve_strategy(&args.strategy);
    let points = sweep_grid(&args.tiles, &args.reductions, &args.depths);
    let results = sweep(&base, &points);

    let mut valid = 0;
    for result in &results {
        let p = &result.point;
        match &result.outcome {
            Ok((ops, fingerprint)) => {
                valid += 1;
                println!(
                    "{:>4}x{:<4} k{:<3} depth {}  ok   {:>2} ops  {}",
                    p.block_tile.0, p.block_tile.1, p.reduction_tile_size, p.pipeline_depth, ops,
                    fingerprint
                );
            }
            Err(reason) if !args.valid_only => println!(
                "{:>4}x{:<4} k{:<3} depth {}  fail {}",
                p.block_tile.0, p.block_tile.1, p.reduction_tile_size, p.pipeline_depth, reason
            ),
            Err(_) => {}
        }
    }

    eprintln!("{} of {} configurations build", valid, results.len());
    if valid == 0 {
        Diagnostic::warning(
            "no configuration in the sweep produced a valid strategy".to_string(),
            Span::dummy(),
        )
        .with_help("check --num-threads and --num-warps against the tile sizes".to_string())
        .render("", "");
        process::exit(1);
    }
}
