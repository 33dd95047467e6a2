//! End-to-end throughput benchmark for Herald.
//!
//! Every client sends `chat_message` in a loop; the relay broadcasts each one
//! as `new_chat_message` to all clients, so received counts grow with the
//! square of the client count.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/notifications";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Herald end-to-end throughput");
    println!("  server:  {url} (start it with `cargo run --release -p herald-server`)");
    println!("  clients: {num_clients}");
    println!("  warmup {WARMUP_SECS}s, measure {BENCH_SECS}s");
    println!();

    run(num_clients, url).await;
}

async fn run(num_clients: usize, url: String) {
    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let handles: Vec<_> = (0..num_clients)
        .map(|client_id| {
            let url = url.clone();
            let sent = Arc::clone(&sent);
            let received = Arc::clone(&received);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                if let Err(e) = run_client(client_id, &url, sent, received, barrier).await {
                    eprintln!("client {client_id} error: {e}");
                }
            })
        })
        .collect();

    barrier.wait().await;
    println!("all {num_clients} clients connected");

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    sent.store(0, Ordering::SeqCst);
    received.store(0, Ordering::SeqCst);
    let start = Instant::now();
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let sent = sent.load(Ordering::SeqCst);
    let received = received.load(Ordering::SeqCst);

    println!();
    println!("duration:   {elapsed:>12.2} s");
    println!("sent:       {sent:>12} ({:.0} msg/s)", sent as f64 / elapsed);
    println!(
        "delivered:  {received:>12} ({:.0} msg/s)",
        received as f64 / elapsed
    );
    println!(
        "per client: {:>12.0} msg/s",
        received as f64 / elapsed / num_clients as f64
    );

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    url: &str,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();

    // First frame is the `connected` greeting.
    stream.next().await.ok_or("closed before greeting")??;

    barrier.wait().await;

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let Message::Text(text) = message {
                if text.contains("\"new_chat_message\"") {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    let payload = serde_json::json!({
        "event": "chat_message",
        "data": { "from": client_id, "text": "x".repeat(64) },
    })
    .to_string();

    while sink.send(Message::Text(payload.clone())).await.is_ok() {
        sent.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}
