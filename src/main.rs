use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::{pin_mut, StreamExt};
use std::path::PathBuf;

use riffle::config::Config;
use riffle::fetch::Fetcher;
use riffle::storage::{EntryFilter, Storage};
use riffle::Reader;

/// Get the config directory path (~/.config/riffle/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("riffle"))
}

#[derive(Parser, Debug)]
#[command(name = "riffle", about = "Self-hosted feed reader backend")]
struct Args {
    /// Config file path (default: ~/.config/riffle/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database path (overrides the config file)
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a feed URL
    Add { url: String },
    /// Delete a feed and all its entries
    Remove { url: String },
    /// List all feeds
    List,
    /// Update one feed, or all feeds concurrently
    Update { url: Option<String> },
    /// List entries, newest first
    Entries {
        /// Only entries from this feed
        #[arg(long)]
        feed: Option<String>,
        /// Only unread entries
        #[arg(long)]
        unread: bool,
        /// Only important entries
        #[arg(long)]
        important: bool,
        /// Maximum number of entries (0 = all)
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Mark an entry as read
    MarkRead { feed: String, id: String },
    /// Mark an entry as unread
    MarkUnread { feed: String, id: String },
    /// Mark an entry as important
    Important { feed: String, id: String },
    /// Clear an entry's important flag
    Unimportant { feed: String, id: String },
    /// Force the next update of a feed to re-evaluate all entries
    Stale { url: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&config_path).context("failed to load configuration")?;
    if let Some(database) = args.database {
        config.database = database;
    }

    let storage = Storage::open(&config.database)
        .await
        .with_context(|| format!("failed to open database: {}", config.database))?;
    let fetcher = Fetcher::new(config.fetch_config()).context("failed to build HTTP client")?;
    let reader = Reader::new(storage, fetcher, &config);

    match args.command {
        Command::Add { url } => {
            reader.add_feed(url.as_str()).await?;
            println!("Added {url}");
        }
        Command::Remove { url } => {
            reader.remove_feed(url.as_str()).await?;
            println!("Removed {url}");
        }
        Command::List => {
            let feeds = reader.list_feeds().await?;
            if feeds.is_empty() {
                println!("No feeds. Add one with: riffle add <url>");
            }
            for feed in feeds {
                let title = feed.resolved_title().unwrap_or("(no title)");
                println!("{}  {}", feed.url, title);
            }
        }
        Command::Update { url: Some(url) } => {
            let updated = reader.update_feed(url.as_str()).await?;
            let new = updated.iter().filter(|e| e.new).count();
            println!(
                "{url}: {} new, {} modified",
                new,
                updated.len() - new
            );
        }
        Command::Update { url: None } => {
            let results = reader.update_feeds().await?;
            pin_mut!(results);

            let mut failures = 0usize;
            while let Some(result) = results.next().await {
                let result = result.context("update aborted by a batch hook")?;
                match result.outcome {
                    Ok(entries) => {
                        let new = entries.iter().filter(|e| e.new).count();
                        println!(
                            "{}: {} new, {} modified",
                            result.url,
                            new,
                            entries.len() - new
                        );
                    }
                    Err(error) => {
                        failures += 1;
                        eprintln!("{}: {}", result.url, error);
                    }
                }
            }
            if failures > 0 {
                eprintln!("{failures} feed(s) failed");
            }
        }
        Command::Entries {
            feed,
            unread,
            important,
            limit,
        } => {
            let filter = EntryFilter {
                feed_url: feed,
                read: unread.then_some(false),
                important: important.then_some(true),
            };
            let entries = reader.get_entries(filter, limit);
            pin_mut!(entries);
            while let Some(entry) = entries.next().await {
                let entry = entry?;
                let marker = if entry.read { ' ' } else { '*' };
                println!(
                    "{marker} {}  {}  {}",
                    entry.updated.format("%Y-%m-%d"),
                    entry.id,
                    entry.title.as_deref().unwrap_or("(no title)")
                );
            }
        }
        Command::MarkRead { feed, id } => {
            reader.mark_entry_read(feed.as_str(), &id).await?;
        }
        Command::MarkUnread { feed, id } => {
            reader.mark_entry_unread(feed.as_str(), &id).await?;
        }
        Command::Important { feed, id } => {
            reader.mark_entry_important(feed.as_str(), &id).await?;
        }
        Command::Unimportant { feed, id } => {
            reader.mark_entry_unimportant(feed.as_str(), &id).await?;
        }
        Command::Stale { url } => {
            reader.set_feed_stale(url.as_str(), true).await?;
            println!("Next update of {url} will re-evaluate all entries");
        }
    }

    Ok(())
}
