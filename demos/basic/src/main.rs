//! Basic demo using the SQLite backend.
//!
//! This demo shows:
//! - Opening a per-project queue from a `QueueConfig`
//! - Adding jobs with different priorities
//! - Draining the queue from several consumers that each hold their own
//!   connection
//!
//! Run with: `cargo run -p demo-basic`
//! Set `SPIDERQ_BACKEND=redis` (and a local Redis) to run against Redis.

use serde_json::{json, Map};
use spiderq::{BackendKind, QueueConfig, SpiderQueue};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CONSUMERS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_millis(10);

#[tokio::main]
async fn main() -> spiderq::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let backend = match std::env::var("SPIDERQ_BACKEND") {
        Ok(value) => value.parse()?,
        Err(_) => BackendKind::Sqlite,
    };
    let dbs_dir = std::env::temp_dir().join("spiderq-demo");

    let config = QueueConfig::builder()
        .backend(backend)
        .dbs_dir(&dbs_dir)
        .project("quotes")
        .build();

    println!("spiderq demo ({:?})\n", config.backend);

    let producer = spiderq::connect(&config).await?;
    producer.clear().await?;

    let jobs = [
        ("toscrape", 1.0, "https://quotes.toscrape.com/page/1/"),
        ("toscrape", 5.0, "https://quotes.toscrape.com/page/2/"),
        ("authors", 3.0, "https://quotes.toscrape.com/author/Albert-Einstein/"),
        ("tags", 0.0, "https://quotes.toscrape.com/tag/love/"),
        ("toscrape", 2.0, "https://quotes.toscrape.com/page/3/"),
    ];

    for (spider, priority, url) in jobs {
        let mut args = Map::new();
        args.insert("url".to_string(), json!(url));
        producer.add(spider, priority, args).await?;
        println!("  queued {:<10} priority={:<4} {}", spider, priority, url);
    }

    println!("\nQueue length: {}\n", producer.count().await?);

    let mut handles = Vec::with_capacity(CONSUMERS);
    for worker in 0..CONSUMERS {
        let consumer = spiderq::connect(&config).await?;
        handles.push(tokio::spawn(async move {
            let mut taken = 0;
            // On Redis `pop` can come back empty after losing a race while
            // entries remain, so drain until the queue itself is empty.
            while consumer.count().await? > 0 {
                let Some(job) = consumer.pop().await? else {
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                };
                println!(
                    "  [consumer {}] {} {}",
                    worker,
                    job.name(),
                    job.get("url").and_then(|v| v.as_str()).unwrap_or("-")
                );
                taken += 1;
            }
            Ok::<_, spiderq::QueueError>(taken)
        }));
    }

    let mut total = 0;
    for handle in handles {
        match handle.await {
            Ok(result) => total += result?,
            Err(e) => tracing::error!(error = %e, "Consumer task failed"),
        }
    }

    println!("\nConsumed {} jobs, {} left", total, producer.count().await?);
    Ok(())
}
