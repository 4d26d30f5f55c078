use clap::Args;

use super::{resolve_strategy, validate_or_exit, StrategyArgs};

#[derive(Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub strategy: StrategyArgs,
}

pub fn cmd_show(args: ShowArgs) {
    let (strategy, file) = resolve_strategy(&args.strategy);
    println!("{}", strategy);
    validate_or_exit(&strategy, file.as_ref());
}
