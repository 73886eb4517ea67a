//! Ask a running relay to notify every subscriber.

use clap::Parser;
use podcast_proto::protocol::DispatchRequest;
use serde_json::Value;

const DEFAULT_TITLE: &str = "New episode available";
const DEFAULT_BODY: &str = "Your favourite podcast just published a new episode. Listen now!";

#[derive(Parser, Debug)]
#[command(name = "send-notification", version)]
struct Args {
    /// Relay base URL.
    #[arg(long, default_value = "http://localhost:3000")]
    server: String,
    #[arg(long, default_value = DEFAULT_TITLE)]
    title: String,
    #[arg(long, default_value = DEFAULT_BODY)]
    body: String,
    /// Page to open when the notification is clicked.
    #[arg(long, default_value = "/")]
    url: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let endpoint = format!("{}/notificar", args.server.trim_end_matches('/'));
    let request = DispatchRequest {
        title: Some(args.title),
        body: Some(args.body),
        url: Some(args.url),
    };

    println!("Sending push notification via {}...", endpoint);

    let response = match reqwest::Client::new().post(&endpoint).json(&request).send().await {
        Ok(response) => response,
        Err(e) => {
            eprintln!("Could not reach the relay: {}", e);
            eprintln!("Make sure it is running: podcast-relay");
            std::process::exit(1);
        }
    };

    let status = response.status();
    println!("Status: {}", status);
    let text = response.text().await?;

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => {
            println!("{}", serde_json::to_string_pretty(&json)?);
            let sent = json.get("sent").and_then(Value::as_u64).unwrap_or(0);
            if sent > 0 {
                println!("Notification delivered to {} subscriber(s).", sent);
            } else if let Some(error) = json.get("error").and_then(Value::as_str) {
                eprintln!("Error: {}", error);
                let hint = json
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Make sure a browser has subscribed through the app first");
                eprintln!("{}", hint);
            }
        }
        Err(_) if text.is_empty() => println!("Empty response from the relay"),
        Err(_) => println!("Non-JSON response:\n{}", text),
    }

    if !status.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
