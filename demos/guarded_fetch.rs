//! Example: Fetch a resource through the resilience layer.
//!
//! Run with: cargo run --example guarded_fetch -- https://httpbin.org /get
//!
//! Settings are read from `API_GUARD_*` variables, including a `.env` file.
//! Set `RUST_LOG=api_guard=debug` to see cache and retry decisions.

use std::time::Duration;

use api_guard::cache::Params;
use api_guard::transport::{HttpTransport, Method};
use api_guard::{GuardedClient, ResilienceConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let mut args = std::env::args().skip(1);
    let base_url = args.next().unwrap_or_else(|| "https://httpbin.org".to_string());
    let path = args.next().unwrap_or_else(|| "/get".to_string());

    let transport = HttpTransport::builder()
        .base_url(base_url)
        .timeout(Duration::from_secs(10))
        .build()?;
    let client = GuardedClient::new(transport, ResilienceConfig::from_env()?)?;
    let janitor = client.spawn_cache_janitor(Duration::from_secs(60));

    let mut params = Params::new();
    params.insert("source".to_string(), "api-guard".into());

    for round in 1..=3 {
        match client.call("fetch", Method::GET, &path, &params, None).await {
            Ok(body) => println!("Round {round}: {} bytes", body.to_string().len()),
            Err(failure) => {
                println!("Round {round}: {failure}");
                if let Some(wait) = failure.retry_after() {
                    println!("Server asked to wait {wait:?}");
                }
            }
        }
    }

    println!("Cache: {:?}", client.cache_stats().await);
    println!("Metrics: {}", serde_json::to_string_pretty(&client.metrics_snapshot())?);

    janitor.abort();
    Ok(())
}
