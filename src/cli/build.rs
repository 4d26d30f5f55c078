use std::path::PathBuf;
use std::process;

use clap::Args;

use super::{resolve_strategy, validate_or_exit, StrategyArgs};

#[derive(Args)]
pub struct BuildArgs {
    #[command(flatten)]
    pub strategy: StrategyArgs,
    /// Write the transform script here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Print the BLAKE3 fingerprint of the script instead of the script
    #[arg(long)]
    pub hash: bool,
    /// Dump the resolved configuration to stderr before building
    #[arg(long)]
    pub dump: bool,
}

pub fn cmd_build(args: BuildArgs) {
    let (strategy, file) = resolve_strategy(&args.strategy);
    validate_or_exit(&strategy, file.as_ref());
    if args.dump {
        strategy.dump();
    }

    let script = match tcgen::build_script(&strategy) {
        Ok(script) => script,
        Err(e) => {
            eprintln!("error: {}", e);
            process::exit(1);
        }
    };

    if args.hash {
        println!("{}", script.fingerprint());
        return;
    }

    match args.output {
        Some(path) => {
            if let Err(e) = std::fs::write(&path, format!("{}\n", script)) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
            eprintln!(
                "Wrote {} ops to {} ({})",
                script.ops.len(),
                path.display(),
                script.short_fingerprint()
            );
        }
        None => println!("{}", script),
    }
}
