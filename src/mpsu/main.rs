use clap::Parser;
use mpsu::cli_utils::MpsuArgs;
use mpsu::error::classify;
use mpsu::mpsu::bin::run;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = MpsuArgs::parse();
    args.verbosity.setup_logging();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("party {} failed: {:#}", args.rank, e);
            let code = classify(&e).map_or(1, |e| e.exit_code());
            ExitCode::from(code as u8)
        }
    }
}
