#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::io::Write;

use args::Args;
use clap::Parser;
use futures_util::StreamExt;
use relay_config::Config;
use relay_pipeline::{BackendPipeline, CompletionRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(&args.config)?;

    // Initialize telemetry
    let _telemetry_guard = relay_telemetry::init(config.telemetry.as_ref(), "info")?;

    tracing::info!(
        config_path = %args.config.display(),
        "starting relay"
    );

    // Build pipeline
    let pipeline = relay_pipeline::from_config(&config)?;

    let mut request = CompletionRequest::new(args.prompt.clone());
    request.max_tokens = args.max_tokens;
    request.temperature = args.temperature;
    request.top_p = args.top_p;
    request.stream = args.stream;

    let succeeded = tokio::select! {
        outcome = run(&pipeline, request, &args) => outcome?,
        () = shutdown_signal() => false,
    };

    pipeline.shutdown();
    tracing::info!("relay stopped");

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Issue the call and print the outcome; returns whether it succeeded
async fn run(pipeline: &BackendPipeline, request: CompletionRequest, args: &Args) -> anyhow::Result<bool> {
    if args.stream {
        let mut stream = pipeline.stream(request);
        while let Some(event) = stream.next().await {
            match event {
                Ok(chunk) => {
                    if args.json {
                        println!("{}", serde_json::to_string(&chunk)?);
                    } else {
                        print!("{}", chunk.delta);
                        std::io::stdout().flush()?;
                        if chunk.done {
                            println!();
                        }
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    } else {
        let result = pipeline.complete(request).await;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&result)?);
            return Ok(result.is_success());
        }
        match &result.completion {
            Some(text) => {
                println!("{text}");
                Ok(true)
            }
            None => {
                let kind = result.error.map_or_else(|| "unknown".to_string(), |k| k.to_string());
                eprintln!("error: {kind}: {}", result.details.as_deref().unwrap_or("no detail"));
                Ok(false)
            }
        }
    }
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
