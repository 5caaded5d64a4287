//! Connectivity check - pings the API and measures clock skew
//!
//! Usage:
//!   cargo run --example server_time
//!
//! Optional:
//!   QE_ENV=test  # Use the test environment (default: production)

use qe_connector::client::auth::Signer;
use qe_connector::{Config, Environment, QeClient};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qe_connector=debug".parse().unwrap()),
        )
        .init();

    let environment = match std::env::var("QE_ENV").unwrap_or_default().as_str() {
        "test" => Environment::Test,
        _ => Environment::Production,
    };

    // Public endpoints need no real credentials
    let config = Config::new("", "").with_environment(environment);
    let client = QeClient::new(config)?;

    client.rest().ping().await?;
    println!("Ping OK ({})", client.rest().base_url());

    let server = client.rest().server_time().await?;
    let local = Signer::current_timestamp_ms();
    println!("Server time: {}", server);
    println!("Local time:  {}", local);
    println!("Skew:        {} ms", local - server);

    Ok(())
}
