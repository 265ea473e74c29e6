use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "telemetry-cli")]
#[command(about = "Operator CLI for the telemetry pipeline", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:9090")]
    url: String,

    #[arg(short, long, env = "TELEMETRY_ADMIN_KEY", default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pipeline state and connection summary
    Status,
    /// Health report with last-known metrics
    Health,
    /// Raw Prometheus metrics
    Metrics,
    /// Recorded alerts
    Alerts {
        /// Minimum level (info, warning, error, critical)
        #[arg(short, long)]
        level: Option<String>,
        /// RFC 3339 lower bound
        #[arg(short, long)]
        since: Option<String>,
        #[arg(short, long)]
        metric: Option<String>,
    },
    /// Compression statistics per message type
    Compression,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    if !cli.key.is_empty() {
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
        );
    }

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Health => client.get(format!("{}/health", cli.url)),
        Commands::Metrics => {
            let res = client.get(format!("{}/metrics", cli.url)).send().await?;
            println!("{}", res.text().await?);
            return Ok(());
        }
        Commands::Alerts {
            level,
            since,
            metric,
        } => {
            let query: Vec<(&str, String)> = [("level", level), ("since", since), ("metric", metric)]
                .into_iter()
                .filter_map(|(key, value)| value.map(|v| (key, v)))
                .collect();
            client
                .get(format!("{}/admin/alerts", cli.url))
                .query(&query)
        }
        Commands::Compression => client.get(format!("{}/admin/compression", cli.url)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if !status.is_success() && status != reqwest::StatusCode::SERVICE_UNAVAILABLE {
        eprintln!("Error: admin API returned status {}", status);
        if !text.is_empty() {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}
