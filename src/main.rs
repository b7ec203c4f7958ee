use tokio_util::sync::CancellationToken;

use adoptable_pets::config::get_configuration;
use adoptable_pets::startup::{build_digest_scheduler, Application};
use adoptable_pets::telemetry::{get_subscriber, init_subscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = get_subscriber(
        String::from("adoptable_pets"),
        String::from("info"),
        std::io::stdout,
    );

    init_subscriber(subscriber);

    let config = get_configuration()?;
    let cancellation = CancellationToken::new();
    let scheduler = build_digest_scheduler(&config, cancellation.clone())?;
    let application = Application::build(config.clone()).await?;

    tracing::info!("Server listening on {}", config.get_address());

    let scheduler_task = tokio::spawn(scheduler.run_until_stopped());

    // actix stops the server on SIGINT/SIGTERM; the digest scheduler follows it down
    let server_outcome = application.run_until_stop().await;

    cancellation.cancel();
    if let Err(err) = scheduler_task.await {
        tracing::error!(error = %err, "Digest scheduler task failed.");
    }

    server_outcome?;

    Ok(())
}
