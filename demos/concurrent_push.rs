use std::time::Instant;

use anyhow::Result;
use serde_json::json;
use unipush_rs::{UniPushClient, UniPushConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Create a single client instance
    let client = UniPushClient::new(UniPushConfig {
        app_id: std::env::var("UNIPUSH_APP_ID")?,
        app_key: std::env::var("UNIPUSH_APP_KEY")?,
        app_secret: std::env::var("UNIPUSH_APP_SECRET")?,
        master_secret: std::env::var("UNIPUSH_MASTER_SECRET")?,
        base_url: None,
    })?;

    // Test cids (replace with real device ids)
    let cids = vec![
        "cid-0001", "cid-0002", "cid-0003", "cid-0004", "cid-0005",
        "cid-0006", "cid-0007", "cid-0008", "cid-0009", "cid-0010",
    ];

    println!("Pushing to {} devices concurrently...", cids.len());
    let start = Instant::now();

    // Spawn concurrent tasks; clones share one connection pool and one
    // cached token, so only the first push pays for /auth
    let handles: Vec<_> = cids
        .iter()
        .map(|cid| {
            let client = client.clone(); // Cheap clone (Arc)
            let cid = cid.to_string();
            tokio::spawn(async move {
                client
                    .push_single_cid(json!({
                        "audience": { "cid": [cid] },
                        "push_message": {
                            "notification": {
                                "title": "Hello",
                                "body": "Concurrent push demo",
                                "click_type": "none",
                            }
                        }
                    }))
                    .await
            })
        })
        .collect();

    // Wait for all tasks to complete
    let mut results = Vec::new();
    for handle in handles {
        match handle.await? {
            Ok(envelope) => results.push(envelope),
            Err(e) => eprintln!("Error pushing notification: {}", e),
        }
    }

    let elapsed = start.elapsed();

    println!("\n=== Results ===");
    println!("Submitted {} pushes in {:?}", results.len(), elapsed);
    println!(
        "Throughput: {:.2} pushes/sec",
        results.len() as f64 / elapsed.as_secs_f64()
    );

    for (i, envelope) in results.iter().enumerate() {
        println!(
            "[{}] code {} - {}",
            i + 1,
            envelope.code,
            envelope.msg.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
