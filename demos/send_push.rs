use anyhow::Result;
use serde_json::json;
use unipush_rs::{UniPushClient, UniPushConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let client = UniPushClient::new(UniPushConfig {
        app_id: std::env::var("UNIPUSH_APP_ID")?,
        app_key: std::env::var("UNIPUSH_APP_KEY")?,
        app_secret: std::env::var("UNIPUSH_APP_SECRET")?,
        master_secret: std::env::var("UNIPUSH_MASTER_SECRET")?,
        base_url: None,
    })?;

    let envelope = client
        .push_single_cid(json!({
            "audience": { "cid": ["REPLACE_WITH_A_REAL_CID"] },
            "push_message": {
                "notification": {
                    "title": "Hello",
                    "body": "Pushed from unipush-rs",
                    "click_type": "none",
                }
            }
        }))
        .await?;

    println!(
        "Result: {} - {}",
        envelope.code,
        envelope.msg.as_deref().unwrap_or("")
    );

    if let Some(data) = &envelope.data {
        println!("Data: {}", data);
    }

    Ok(())
}
