use clap::Parser;
use tracing::info;

use lockbell_cli::commands::{self, Cluster};
use lockbell_cli::logging::init_logging;
use lockbell_cli::shutdown::cancel_on_signal;
use lockbell_cli::{Cli, Command, Settings};
use lockbell_common::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::new(&cli)?;

    let _logging_guard = init_logging(&settings.logging_config())?;

    let lock_config = settings.lock_config()?;
    info!(
        ttl_ms = lock_config.ttl_ms,
        retry_tries = lock_config.retry_tries,
        "Lockbell starting"
    );

    let cluster = Cluster::new(lock_config);
    let ctx = Context::background().with_cancel();
    let signal_task = cancel_on_signal(ctx.clone());

    let output = match &cli.command {
        Command::Contend(args) => {
            serde_json::to_string_pretty(&commands::contend(&cluster, args, &ctx).await?)?
        }
        Command::Wait(args) => {
            serde_json::to_string_pretty(&commands::wait(&cluster, args, &ctx).await?)?
        }
    };

    ctx.cancel();
    let _ = signal_task.await;

    println!("{}", output);
    Ok(())
}
