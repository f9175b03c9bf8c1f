use std::process::ExitCode;

use canister_proxy::{parse_args, Command, PortRouter, USAGE};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canister_proxy=info,upstream_proxy=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup errors are for the person at the terminal, not the log.
    let config = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Ok(Command::Run(config)) => config,
        Err(error) => {
            println!("{error}");
            println!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };

    let mut routers = JoinSet::new();

    for binding in config.bindings() {
        let router = PortRouter::new(binding.clone(), config.replica_host());

        routers.spawn(async move { router.bind().await?.serve().await });
    }

    // A router that fails only takes its own port down.
    while let Some(result) = routers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::error!("{}", error),
            Err(error) => tracing::error!("router task ended: {}", error),
        }
    }

    tracing::error!("no canister is being proxied anymore");

    ExitCode::FAILURE
}
