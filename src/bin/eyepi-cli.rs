use clap::{Parser, Subcommand};
use eyepi::rpc::proto::eye_pi_client::EyePiClient;
use eyepi::rpc::proto::HelloRequest;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "eyepi-cli")]
#[command(about = "Client for the EyePi service", long_about = None)]
struct Cli {
    /// gRPC endpoint
    #[arg(long, default_value = "http://localhost:10000")]
    rpc: String,

    /// HTTP/JSON gateway
    #[arg(long, default_value = "http://localhost:8080")]
    gateway: String,

    /// Metrics exporter
    #[arg(long, default_value = "http://localhost:10001")]
    metrics: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call HelloProxy over gRPC
    Ping {
        #[arg(default_value = "ping")]
        text: String,
    },
    /// Call HelloProxy through the HTTP/JSON gateway
    Gateway {
        #[arg(default_value = "ping")]
        text: String,
    },
    /// Fetch the metrics report
    Metrics,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ping { text } => {
            let mut client = EyePiClient::connect(cli.rpc).await?;
            match client.hello_proxy(HelloRequest { hello_text: text }).await {
                Ok(reply) => println!("{}", reply.into_inner().text),
                Err(status) => {
                    eprintln!("Error: {:?}: {}", status.code(), status.message());
                    std::process::exit(1);
                }
            }
        }
        Commands::Gateway { text } => {
            let res = reqwest::Client::new()
                .post(format!("{}/v1/hello", cli.gateway))
                .json(&serde_json::json!({ "hello_text": text }))
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Metrics => {
            let res = reqwest::get(format!("{}/metrics", cli.metrics)).await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
