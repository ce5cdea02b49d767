#![forbid(unused_must_use)]
#![allow(clippy::single_match)]

use clap::Parser;

mod functions;
mod info;
mod locals;
mod util;

#[derive(clap::Parser)]
struct CommandWithFlags {
    /// Reduce logging to just warnings and errors.
    #[arg(long)]
    quiet: bool,

    /// Turn on debug output in all `stacksize` modules. Noisy!
    #[arg(long)]
    verbose: bool,

    /// Show timestamps in log messages
    #[arg(long)]
    timestamps: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Lists functions with their own frame size and the stack space their callers reserve.
    Functions(functions::FunctionsOptions),
    /// Lists the parameters and locals of a function.
    Locals(locals::LocalsOptions),
    /// Describes files: their format, sections, and the PDB streams that were decoded.
    Info(info::InfoOptions),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let command_with_flags = CommandWithFlags::parse();
    configure_tracing(&command_with_flags);

    match command_with_flags.command {
        Command::Functions(args) => functions::command(args).await?,
        Command::Locals(args) => locals::command(args).await?,
        Command::Info(args) => info::command(args).await?,
    }

    Ok(())
}

fn configure_tracing(args: &CommandWithFlags) {
    use tracing_subscriber::filter::LevelFilter;

    let max_level = if args.quiet {
        LevelFilter::WARN
    } else if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let builder = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_writer(std::io::stderr);
    if args.timestamps {
        builder.init();
    } else {
        builder.without_time().init();
    }
}
