use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use common::protocol::{
    resolve_code, Domain, HeadlinesQuery, SourcesQuery, SubCommand, CATEGORIES, COUNTRIES, LANGUAGES,
};
use newsdesk::client::{load_result, NewsClient, Reply};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Target {
    Headlines,
    Sources,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Mode {
    Keywords,
    Category,
    Country,
    Language,
    All,
}

#[derive(Parser, Debug)]
#[command(name = "newsdesk-client", about = "Query a newsdesk server from the command line")]
struct Args {
    /// Name sent in the handshake
    #[arg(long)]
    name: String,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 49999)]
    port: u16,

    /// Seconds to wait for the server's answer
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Print titles from the result file (looked up in --dir)
    #[arg(long)]
    summary: bool,

    /// Directory the server writes result files to
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    target: Target,

    mode: Mode,

    /// Keywords, category, or country/language code or name
    value: Option<String>,
}

fn sub_command(target: Target, mode: Mode) -> Result<SubCommand> {
    let sub = match (target, mode) {
        (Target::Headlines, Mode::Keywords) => SubCommand::Headlines(HeadlinesQuery::Keywords),
        (Target::Headlines, Mode::Category) => SubCommand::Headlines(HeadlinesQuery::Category),
        (Target::Headlines, Mode::Country) => SubCommand::Headlines(HeadlinesQuery::Country),
        (Target::Headlines, Mode::All) => SubCommand::Headlines(HeadlinesQuery::Latest),
        (Target::Sources, Mode::Category) => SubCommand::Sources(SourcesQuery::Category),
        (Target::Sources, Mode::Country) => SubCommand::Sources(SourcesQuery::Country),
        (Target::Sources, Mode::Language) => SubCommand::Sources(SourcesQuery::Language),
        (Target::Sources, Mode::All) => SubCommand::Sources(SourcesQuery::All),
        (t, m) => bail!("{:?} cannot be searched by {:?}", t, m),
    };
    Ok(sub)
}

/// Map friendly input ("Japan", "English") onto the codes the server expects.
fn normalize_value(mode: Mode, value: &str) -> Result<String> {
    match mode {
        Mode::Country => resolve_code(COUNTRIES, value)
            .map(str::to_string)
            .with_context(|| format!("unknown country '{}'", value)),
        Mode::Language => resolve_code(LANGUAGES, value)
            .map(str::to_string)
            .with_context(|| format!("unknown language '{}'", value)),
        Mode::Category => {
            let lower = value.trim().to_lowercase();
            if !CATEGORIES.contains(&lower.as_str()) {
                bail!("unknown category '{}' (one of: {})", value, CATEGORIES.join(", "));
            }
            Ok(lower)
        }
        Mode::Keywords | Mode::All => Ok(value.trim().to_string()),
    }
}

fn print_summary(domain: Domain, body: &Value) {
    if body["status"] == "error" {
        println!("upstream error: {}", body["message"].as_str().unwrap_or("unknown"));
    }
    let items = body[domain.payload_key()].as_array().cloned().unwrap_or_default();
    println!("{} {}", items.len(), domain.payload_key());
    for (i, item) in items.iter().enumerate() {
        let label = match domain {
            Domain::Headlines => item["title"].as_str(),
            Domain::Sources => item["name"].as_str(),
        };
        println!("  {}. {}", i + 1, label.unwrap_or("(untitled)"));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let sub = sub_command(args.target, args.mode)?;
    let value = match (&args.value, sub.requires_param()) {
        (Some(v), true) => Some(normalize_value(args.mode, v)?),
        (None, true) => bail!("'{}' needs a value", sub.as_wire()),
        (_, false) => None,
    };

    let addr = format!("{}:{}", args.host, args.port);
    let mut client = NewsClient::connect(&addr, &args.name)
        .await?
        .with_timeout(Duration::from_secs(args.timeout));
    let reply = client.request(sub, value.as_deref()).await?;
    client.quit().await?;

    match reply {
        Reply::File(name) => {
            println!("{}", name);
            if args.summary {
                let body = load_result(&args.dir, &name).await?;
                print_summary(sub.domain(), &body);
            }
            Ok(())
        }
        Reply::Error(message) => bail!("server error: {}", message),
    }
}
