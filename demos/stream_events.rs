//! Live user event stream - prints order and fill updates as they arrive
//!
//! Usage:
//!   QE_API_KEY=xxx QE_SECRET_KEY=yyy cargo run --example stream_events
//!
//! Optional:
//!   QE_ENV=test  # Use the test environment (default: production)
//!   QE_STREAM_SECS=120  # How long to stay connected (default: 60)

use std::time::Duration;

use qe_connector::client::websocket::{Event, SessionConfig};
use qe_connector::{Config, QeClient};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("qe_connector=info".parse().unwrap()),
        )
        .init();

    let secs: u64 = std::env::var("QE_STREAM_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    println!("=== Quantum Execute User Stream ===\n");

    let client = QeClient::new(Config::from_env()?)?;

    let offset = client.rest().sync_time().await?;
    println!("Clock offset: {} ms", offset);

    let listen_key = client.rest().create_listen_key().await?;
    println!("Listen key expires at {}\n", listen_key.expire_at);

    // Forward events to the main task so printing never blocks the session
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = client.websocket_with(
        move |event: Event| {
            let _ = tx.send(event);
        },
        SessionConfig::default().reconnect_delay(Duration::from_secs(3)),
    );
    session.connect(listen_key.listen_key).await?;

    let deadline = tokio::time::sleep(Duration::from_secs(secs));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            Some(event) = rx.recv() => match event {
                Event::Connected => println!("[connected]"),
                Event::Disconnected => println!("[disconnected, reconnecting]"),
                Event::Raw(_) => {}
                Event::Status(data) => println!("status: {}", data),
                Event::ServerError(message) => println!("server error: {}", message),
                Event::MasterOrder(order) => println!(
                    "master order {} {} {} qty={} status={}",
                    order.master_order_id, order.symbol, order.side, order.qty, order.status
                ),
                Event::Order(order) => println!(
                    "order {} {} {} @ {} filled={}/{} status={}",
                    order.order_id,
                    order.symbol,
                    order.side,
                    order.price,
                    order.cum_filled_qty,
                    order.quantity,
                    order.status
                ),
                Event::Fill(fill) => println!(
                    "fill {} {} {} {} @ {}",
                    fill.order_id, fill.symbol, fill.side, fill.filled_qty, fill.fill_price
                ),
                Event::DecodeFailed(e) => println!("decode failed: {}", e),
            },
        }
    }

    session.close().await?;
    println!("\nSession closed");
    Ok(())
}
