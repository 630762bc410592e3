use std::{fs, path::PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::EnvFilter;

use pocket_short::{
    config::{self, base_url_capsule},
    event_log::event_log_capsule,
    model::ShortCode,
    url_service::{RedirectError, ShortenRequest, ShortenedUrl, url_service_capsule},
};

#[derive(Parser)]
#[command(version, about = "Shorten URLs into local short codes with expiry and click stats")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Shorten a single URL
    Shorten {
        long_url: String,
        /// How long the link stays valid, in minutes (default 30)
        #[arg(short, long)]
        minutes: Option<String>,
        /// Custom alphanumeric short code, 3 to 15 characters
        #[arg(short, long)]
        code: Option<String>,
    },
    /// Shorten up to five URLs listed in a JSON file of `{"longUrl", "minutes", "code"}` rows
    Batch { file: PathBuf },
    /// Follow a short code, counting a click, and print the URL it points to
    Open { code: String },
    /// List every short link with its click count
    Stats {
        /// Also list each link's click timestamps, newest first
        #[arg(long)]
        history: bool,
    },
    /// Print the event log, oldest first
    Logs,
    /// Delete a short link
    Delete { code: String },
}

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let container = config::init_container();
    let url_service = container.read(url_service_capsule);
    let base_url = container.read(base_url_capsule);
    let short_link = |code: &ShortCode| format!("{base_url}/short/{code}");

    match cli.command {
        Command::Shorten {
            long_url,
            minutes,
            code,
        } => {
            let created = url_service.shorten(&ShortenRequest {
                long_url,
                minutes,
                code,
            })?;
            print_created(&short_link(&created.short_code), &created)?;
        }
        Command::Batch { file } => {
            let contents = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let requests: Vec<ShortenRequest> = serde_json::from_str(&contents)
                .with_context(|| format!("{} is not a JSON array of rows", file.display()))?;

            let results = url_service.shorten_batch(&requests)?;
            let created = results.iter().filter(|result| result.is_ok()).count();
            for (idx, result) in results.into_iter().enumerate() {
                match result {
                    Ok(shortened_url) => {
                        print!("Row {}: ", idx + 1);
                        print_created(&short_link(&shortened_url.short_code), &shortened_url)?;
                    }
                    Err(err) => eprintln!("Row {}: {err}", idx + 1),
                }
            }
            println!("{created} short link(s) created.");
        }
        Command::Open { code } => match url_service.resolve(&code) {
            Ok(redirect) => println!("{}", redirect.url),
            Err(RedirectError::NotFound) => bail!("Short link not found."),
            Err(RedirectError::Expired { .. }) => bail!("This link has expired."),
            Err(RedirectError::Internal(err)) => return Err(err),
        },
        Command::Stats { history } => {
            let stats = url_service.stats()?;
            if stats.is_empty() {
                println!("No entries yet.");
            }
            for link in stats {
                println!(
                    "{}\t{}\t{}\texpires {}{}\t{} click(s)",
                    link.short_code,
                    short_link(&link.short_code),
                    link.long_url,
                    format_time(link.expiry)?,
                    if link.expired { " (expired)" } else { "" },
                    link.clicks,
                );
                if history {
                    if link.click_history.is_empty() {
                        println!("\tNo clicks recorded");
                    }
                    for click in link.click_history {
                        println!("\t{}", format_time(click.0)?);
                    }
                }
            }
        }
        Command::Logs => {
            for entry in container.read(event_log_capsule).get_logs()? {
                println!(
                    "{}\t{}\t{}\t{}",
                    format_time(entry.timestamp)?,
                    entry.kind,
                    entry.message,
                    entry.details
                );
            }
        }
        Command::Delete { code } => {
            if url_service.remove(&code)? {
                println!("Removed {code}");
            } else {
                bail!("Short link not found.");
            }
        }
    }
    Ok(())
}

fn print_created(short_link: &str, shortened_url: &ShortenedUrl) -> anyhow::Result<()> {
    println!(
        "{short_link} -> {} (expires {})",
        shortened_url.long_url,
        format_time(shortened_url.expiry)?
    );
    Ok(())
}

fn format_time(time: OffsetDateTime) -> anyhow::Result<String> {
    time.format(&Rfc3339).context("Failed to format timestamp")
}
