use anyhow::{Context, Result};
use clap::Parser;
use image_resize_handler::app::App;
use lambda_runtime::{service_fn, LambdaEvent};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "image-resize-handler")]
#[command(about = "Resize uploaded images from S3 notifications and API Gateway requests")]
struct CliArgs {
    /// Invoke once with the JSON trigger payload in FILE instead of serving
    /// the Lambda runtime API.
    #[arg(long, value_name = "FILE")]
    event: Option<PathBuf>,
}

fn load_event(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read event file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Event file {} is not valid JSON", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "image_resize_handler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_ansi(false))
        .init();

    let args = CliArgs::parse();

    let app = match App::new().await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to initialize handler: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = args.event {
        let payload = load_event(&path)?;
        let result = app.handle(payload).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    info!("Starting Lambda runtime");
    let app = Arc::new(app);
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let app = Arc::clone(&app);
        async move {
            app.handle(event.payload)
                .await
                .map_err(lambda_runtime::Error::from)
        }
    }))
    .await
    .map_err(|e| anyhow::anyhow!(e))
}
