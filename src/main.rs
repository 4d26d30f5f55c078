mod cli;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cli::build::BuildArgs;
use cli::phases::PhasesArgs;
use cli::show::ShowArgs;
use cli::sweep::SweepArgs;

#[derive(Parser)]
#[command(
    name = "tcgen",
    version,
    about = "Tensor-core matmul lowering strategies for GPU code generation"
)]
struct Cli {
    /// Log every strategy phase (same as RUST_LOG=tcgen=debug)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the resolved configuration and its derived mappings
    Show(ShowArgs),
    /// Validate the configuration and emit the transform script
    Build(BuildArgs),
    /// List pipeline phases and whether they run
    Phases(PhasesArgs),
    /// Build a grid of tile and depth configurations in parallel
    Sweep(SweepArgs),
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tcgen=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Show(args) => cli::show::cmd_show(args),
        Command::Build(args) => cli::build::cmd_build(args),
        Command::Phases(args) => cli::phases::cmd_phases(args),
        Command::Sweep(args) => cli::sweep::cmd_sweep(args),
    }
}
