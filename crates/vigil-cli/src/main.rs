use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil home-monitoring CLI")]
struct Cli {
    /// Daemon base URL.
    #[arg(long, default_value = "http://127.0.0.1:8321")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the monitoring pipeline (idempotent)
    Start,
    /// Show daemon status
    Status,
    /// Show the pending verification question, if any
    Question,
    /// Answer the pending verification question
    Answer {
        /// Answer text
        text: String,
    },
    /// Show recent session-log records
    Log {
        /// Maximum records to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// List available cameras
    Cameras,
}

#[derive(Deserialize)]
struct PendingQuestion {
    id: String,
    question: String,
}

#[derive(Deserialize)]
struct LogResponse {
    records: Vec<LogRecord>,
}

#[derive(Deserialize)]
struct LogRecord {
    id: i64,
    question: String,
    answer: String,
    timestamp: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::blocking::Client::new();

    match cli.command {
        Commands::Start => {
            let text = client
                .get(&cli.url)
                .send()
                .context("daemon unreachable")?
                .text()?;
            println!("{text}");
        }
        Commands::Status => {
            let status: serde_json::Value = client
                .get(format!("{}/status", cli.url))
                .send()
                .context("daemon unreachable")?
                .json()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Question => match fetch_pending(&client, &cli.url)? {
            Some(pending) => println!("{}", pending.question),
            None => println!("No question pending."),
        },
        Commands::Answer { text } => {
            let Some(pending) = fetch_pending(&client, &cli.url)? else {
                bail!("no question is pending");
            };
            let response: serde_json::Value = client
                .post(format!("{}/answer", cli.url))
                .json(&serde_json::json!({ "id": pending.id, "answer": text }))
                .send()
                .context("daemon unreachable")?
                .json()?;
            if response["accepted"].as_bool().unwrap_or(false) {
                println!("Answer submitted.");
            } else {
                bail!("answer rejected; the question may have expired");
            }
        }
        Commands::Log { limit } => {
            let log: LogResponse = client
                .get(format!("{}/log?limit={limit}", cli.url))
                .send()
                .context("daemon unreachable")?
                .json()?;
            if log.records.is_empty() {
                println!("Session log is empty.");
            }
            for record in log.records {
                println!("[{}] #{} {}", record.timestamp, record.id, record.question);
                println!("    -> {}", record.answer);
            }
        }
        Commands::Cameras => {
            let devices = vigil_hw::Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found.");
            }
            for device in devices {
                println!("{}  {} ({})", device.path, device.name, device.driver);
            }
        }
    }

    Ok(())
}

fn fetch_pending(
    client: &reqwest::blocking::Client,
    url: &str,
) -> Result<Option<PendingQuestion>> {
    let pending: Option<PendingQuestion> = client
        .get(format!("{url}/question"))
        .send()
        .context("daemon unreachable")?
        .json()?;
    Ok(pending)
}
