use clap::Parser;
use tracing::info;

use trigger_rs::config::{load_dotenv, Settings};
use trigger_rs::worker::WorkerManager;

#[derive(Parser)]
#[command(name = "trigger-worker")]
#[command(about = "Event-driven trigger service worker", long_about = None)]
struct Cli {
    /// Enable debug logging (plain formatter instead of JSON)
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    load_dotenv();

    if cli.debug {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        trigger_rs::init_tracing();
    }

    let settings = Settings::from_env();
    info!(
        queue = %settings.rabbitmq_queue,
        model = %settings.openai_model,
        version = trigger_rs::VERSION,
        "starting trigger worker"
    );

    WorkerManager::new(settings).run().await?;
    Ok(())
}
