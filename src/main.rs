use std::env;

use anyhow::{Context, Result};
use serde_json::json;
use unipush_rs::{UniPushClient, UniPushConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        eprintln!("Usage: {} <cid> <title> <body>", args[0]);
        eprintln!("  cid:   device client id issued by the push SDK");
        eprintln!("  title: notification title");
        eprintln!("  body:  notification body");
        eprintln!();
        eprintln!("Credentials come from the environment:");
        eprintln!("  UNIPUSH_APP_ID, UNIPUSH_APP_KEY, UNIPUSH_APP_SECRET, UNIPUSH_MASTER_SECRET");
        std::process::exit(1);
    }

    let config = config_from_env()?;
    let client = UniPushClient::new(config)?;

    let message = json!({
        "audience": { "cid": [args[1].as_str()] },
        "push_message": {
            "notification": {
                "title": args[2].as_str(),
                "body": args[3].as_str(),
                "click_type": "none",
            }
        }
    });

    let envelope = client.push_single_cid(message).await?;

    println!(
        "Result: {} - {}",
        envelope.code,
        envelope.msg.as_deref().unwrap_or("")
    );
    if let Some(data) = &envelope.data {
        if let Some(taskid) = data["taskid"].as_str() {
            println!("Task id: {}", taskid);
        } else {
            println!("Data: {}", data);
        }
    }

    Ok(())
}

fn config_from_env() -> Result<UniPushConfig> {
    let var = |name: &str| env::var(name).with_context(|| format!("{} not set", name));
    Ok(UniPushConfig {
        app_id: var("UNIPUSH_APP_ID")?,
        app_key: var("UNIPUSH_APP_KEY")?,
        app_secret: var("UNIPUSH_APP_SECRET")?,
        master_secret: var("UNIPUSH_MASTER_SECRET")?,
        base_url: None,
    })
}
