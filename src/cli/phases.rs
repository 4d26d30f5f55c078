use clap::Args;

use tcgen::pipeline::graph::to_dot;
use tcgen::pipeline::PHASES;

use super::{resolve_strategy, StrategyArgs};

#[derive(Args)]
pub struct PhasesArgs {
    #[command(flatten)]
    pub strategy: StrategyArgs,
    /// Emit the phase graph in Graphviz format
    #[arg(long)]
    pub dot: bool,
}

pub fn cmd_phases(args: PhasesArgs) {
    let (strategy, _) = resolve_strategy(&args.strategy);

    if args.dot {
        println!("{}", to_dot(Some(&strategy)));
        return;
    }

    for (i, phase) in PHASES.iter().enumerate() {
        let status = if phase.is_enabled(&strategy) {
            "run "
        } else {
            "skip"
        };
        match phase.when {
            Some(condition) => println!(
                "{:2}  {}  {:<26} if {}",
                i + 1,
                status,
                phase.kind,
                condition.description
            ),
            None => println!("{:2}  {}  {}", i + 1, status, phase.kind),
        }
    }
}
