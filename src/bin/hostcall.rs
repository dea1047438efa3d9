use clap::Parser;
use hostcall::args::{Cli, Command};
use hostcall::{classify_cmd, dehost_cmd, index_cmd, HostCallError};
use std::process::ExitCode;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn init_logging(verbosity: &clap_verbosity_flag::Verbosity) {
    let default_filter = verbosity.log_level_filter().to_string();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match &cli.command {
        Command::Index(args) => init_logging(&args.verbosity),
        Command::Classify(args) => init_logging(&args.verbosity),
        Command::Dehost(args) => init_logging(&args.verbosity),
    }

    let result = match cli.command {
        Command::Index(args) => index_cmd::run(args),
        Command::Classify(args) => classify_cmd::run(args),
        Command::Dehost(args) => dehost_cmd::run(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ HostCallError::InvalidConfig(_)) => {
            log::error!("{e}");
            ExitCode::from(1)
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::from(2)
        }
    }
}
