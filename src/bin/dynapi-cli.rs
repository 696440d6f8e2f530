use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dynapi-cli")]
#[command(about = "Management CLI for the dynapi server", long_about = None)]
struct Cli {
    #[arg(short, long, env = "DYNAPI_ADMIN_URL", default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "DYNAPI_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version and the last reload report
    Status,
    /// List installed routes
    Routes,
    /// Queue a full reload
    Reload,
    /// List configured projects
    Projects,
    /// Create or replace a project
    Apply {
        name: String,
        /// Module as `name` or `name:field,field`; repeatable
        #[arg(short, long = "module")]
        modules: Vec<String>,
        /// JSON file holding the project's validation schema
        #[arg(short, long)]
        schema: Option<PathBuf>,
    },
    /// Delete a project and drop its collections
    Remove { name: String },
}

/// Parse `orders:item,qty` into a module definition.
fn parse_module(arg: &str) -> Value {
    let (name, fields) = match arg.split_once(':') {
        Some((name, fields)) => (
            name,
            fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>(),
        ),
        None => (arg, Vec::new()),
    };
    json!({ "name": name, "fields": fields })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let res = match cli.command {
        Commands::Status => {
            client.get(format!("{}/admin/status", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Routes => {
            client.get(format!("{}/admin/routes", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Reload => {
            client.post(format!("{}/admin/reload", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Projects => {
            client.get(format!("{}/admin/projects", cli.url))
                .headers(headers)
                .send()
                .await?
        }
        Commands::Apply { name, modules, schema } => {
            let schema: Option<Value> = match schema {
                Some(path) => Some(serde_json::from_str(&std::fs::read_to_string(path)?)?),
                None => None,
            };
            let body = json!({
                "modules": modules.iter().map(|m| parse_module(m)).collect::<Vec<_>>(),
                "schema": schema,
            });
            client.put(format!("{}/admin/projects/{}", cli.url, name))
                .headers(headers)
                .json(&body)
                .send()
                .await?
        }
        Commands::Remove { name } => {
            client.delete(format!("{}/admin/projects/{}", cli.url, name))
                .headers(headers)
                .send()
                .await?
        }
    };
    print_response(res).await?;

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
