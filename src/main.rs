use anyhow::{Context, Result};
use clap::Parser;
use newswire::api::ApiClient;
use newswire::article::Article;
use newswire::config::Config;
use newswire::identity::{Identity, IdentitySource, StaticIdentity, UserStateFile};
use newswire::live::{LiveFeed, LiveFeedOptions};
use newswire::realtime::{ChannelManager, ConnectionState, ManagerOptions, WsTransport};
use newswire::resilience::RetryPolicy;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Get the config directory path (~/.config/newswire/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newswire"))
}

#[derive(Parser, Debug)]
#[command(name = "newswire", about = "Live news from a push channel, in your terminal")]
struct Args {
    /// Config file (defaults to ~/.config/newswire/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server base URL, overrides `server_url` from the config file
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Category to subscribe to (repeatable), overrides `categories`
    #[arg(long = "category", value_name = "NAME")]
    categories: Vec<String>,

    /// Connect without an identity even if user state exists
    #[arg(long)]
    anonymous: bool,

    /// Check that the server's HTTP API is reachable, then exit
    #[arg(long)]
    check: bool,
}

fn print_article(label: &str, article: &Article) {
    let when = article
        .published_at()
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let title = article.title().unwrap_or("(untitled)");
    match article.url() {
        Some(url) => println!("[{}] {} {} <{}>", when, label, title, url),
        None => println!("[{}] {} {}", when, label, title),
    }
}

async fn run_check(config: &Config) -> Result<()> {
    let token = config.access_token.clone().map(Identity::new);
    let client = ApiClient::new(&config.server_url, RetryPolicy::from(&config.retry), token)
        .context("Failed to create API client")?;

    match client.get_json::<Value>("/api/health").await {
        Ok(body) => {
            println!("{} is reachable: {}", client.base_url(), body);
            Ok(())
        }
        Err(e) => {
            tracing::debug!(error = %e, "Health check failed");
            eprintln!("Error: {}", e.user_message());
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    if let Some(server) = args.server {
        config.server_url = server;
    }
    if !args.categories.is_empty() {
        config.categories = args.categories;
    }

    if args.check {
        return run_check(&config).await;
    }

    let identity: Box<dyn IdentitySource> = if args.anonymous {
        Box::new(StaticIdentity(None))
    } else {
        let path = config
            .user_state_path
            .clone()
            .unwrap_or_else(|| config_dir.join("user.json"));
        Box::new(UserStateFile::new(path))
    };

    let transport = WsTransport::new(&config.server_url).context("Invalid server URL")?;
    println!("Connecting to {}", transport.endpoint());

    let manager = ChannelManager::new(Arc::new(transport), ManagerOptions::from(&config));
    let options = LiveFeedOptions::new()
        .enabled(config.realtime.enabled)
        .categories(config.categories.clone())
        .on_new_article(|article| print_article("   ", article))
        .on_breaking_news(|article| print_article("!!!", article))
        .on_error(|detail| eprintln!("Channel error: {}", detail.message));
    let feed = LiveFeed::activate(manager.clone(), options, identity.as_ref())
        .context("Failed to start live feed")?;

    if !feed.is_active() {
        println!("Realtime updates are disabled in the config file.");
        return Ok(());
    }

    let mut states = manager.watch_state();

    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match state {
                    ConnectionState::Connected => {
                        println!("Connected, following: {}", feed.categories().join(", "));
                    }
                    ConnectionState::Errored => {
                        println!(
                            "Connection lost, reconnecting (attempt {})",
                            manager.reconnect_attempts()
                        );
                    }
                    ConnectionState::Disconnected => {
                        println!("Disconnected.");
                        break;
                    }
                    ConnectionState::Connecting => {}
                }
            }
        }
    }

    feed.disconnect();
    println!(
        "Kept {} recent articles and {} breaking stories. Goodbye!",
        feed.new_articles().len(),
        feed.breaking_news().len()
    );
    Ok(())
}
