//! `evalpoll`: watch a checkpoint directory and evaluate each new checkpoint.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use evalpoll::common::log::init_logging;
use evalpoll::common::{EvalArgs, EvalConfig, EvalResult};
use evalpoll::evaluation::build_poller;

#[tokio::main]
async fn main() -> ExitCode {
    let args = EvalArgs::parse();
    if let Err(err) = init_logging(&args.log_level, args.log_json) {
        eprintln!("{err}");
        return ExitCode::from(err.code() as u8);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(code = err.code() as u32, error = %err, "evaluation service failed");
            ExitCode::from(err.code() as u8)
        }
    }
}

async fn run(args: EvalArgs) -> EvalResult<()> {
    let cfg = EvalConfig::try_from(args)?;
    let poller = build_poller(&cfg)?;

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));
    poller.run(cancel).await
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "SIGTERM handler unavailable, listening for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("shutdown requested");
    cancel.cancel();
}
