//! SkillSwipe CLI - a command-line client for the SkillSwipe platform.
//!
//! Signs in, keeps the session in the configured token store, and exposes
//! the job, discovery, swipe and wishlist endpoints as subcommands. JSON
//! responses are printed to stdout; logs go to stderr.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skillswipe_core::api::ApiError;
use skillswipe_core::auth::{FileStore, KeyringStore};
use skillswipe_core::config::TokenStorage;
use skillswipe_core::models::{DashboardTab, SwipeRequest, WishlistTarget};
use skillswipe_core::{ApiClient, Config, SessionManager};

#[derive(Parser, Debug)]
#[command(name = "skillswipe", author, version, about, long_about = None)]
#[command(
    after_help = "Environment:\n  SKILLSWIPE_API_URL        API base URL\n  SKILLSWIPE_TIMEOUT_SECS   Per-request timeout\n  RUST_LOG                  Log filter (default: warn)"
)]
struct Cli {
    /// Write logs to this file instead of stderr
    #[arg(long, global = true, env = "SKILLSWIPE_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in (prompts for the password)
    Login {
        /// Account email; defaults to the last one used
        email: Option<String>,
    },
    /// Sign out and forget stored tokens
    Logout,
    /// Show the signed-in user and profile status
    Status,
    /// GET any API path and print the response
    Get { path: String },
    /// List job postings
    Jobs {
        /// Query filters as key=value
        #[arg(value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Job statistics
    Stats,
    /// Cards to swipe on
    Discover {
        /// Query filters as key=value
        #[arg(value_parser = parse_param)]
        filters: Vec<(String, String)>,
    },
    /// Dashboard feed: for_me, showed_interest, matches, stats or any other tab
    Dashboard {
        #[arg(default_value = "for_me")]
        tab: String,
    },
    /// Swipe right on a job or a profile
    Swipe {
        #[arg(value_enum)]
        kind: SwipeKind,
        id: String,
    },
    /// Show or edit the wishlist
    Wishlist {
        #[command(subcommand)]
        action: Option<WishlistCommand>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum SwipeKind {
    Job,
    Profile,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum WishlistCommand {
    /// Save a job posting
    AddJob { job_id: String },
    /// Save a developer or company
    AddUser { user_id: String },
    /// Remove one entry
    Remove { wishlist_id: String },
    /// Remove every entry
    Clear,
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, or to the given file. The returned guard must live
/// until shutdown so buffered file output is flushed.
fn init_tracing(log_file: Option<&Path>) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .context("Log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    let mut config = Config::load()?;
    let client = build_client(&config)?;
    client.on_session_expired(|| {
        eprintln!("Session expired. Run `skillswipe login` to sign in again.");
    });
    info!(base_url = client.base_url(), "SkillSwipe CLI starting");

    if let Err(e) = run(&client, &mut config, cli.command).await {
        match e.downcast_ref::<ApiError>() {
            Some(api_error) => report(api_error),
            None => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
    Ok(())
}

fn build_client(config: &Config) -> Result<ApiClient> {
    let session = match config.token_storage {
        TokenStorage::File => SessionManager::new(FileStore::new(config.cache_dir()?)),
        TokenStorage::Keyring => SessionManager::new(KeyringStore::new()),
    };
    ApiClient::new(config, Arc::new(session))
}

async fn run(client: &ApiClient, config: &mut Config, command: Command) -> Result<()> {
    match command {
        Command::Login { email } => {
            let email = email
                .or_else(|| config.last_email.clone())
                .context("No email given and none remembered; run `skillswipe login <email>`")?;
            let password = rpassword::prompt_password(format!("Password for {}: ", email))
                .context("Failed to read password")?;
            let login = client.login(&email, &password).await?;

            config.last_email = Some(email);
            config.save()?;
            println!("Signed in as {} ({})", login.user.username, login.user.role.as_str());
        }
        Command::Logout => {
            client.logout().await;
            println!("Signed out");
        }
        Command::Status => {
            let Some(user) = client.restore_session().await else {
                println!("Not signed in");
                return Ok(());
            };
            println!("Signed in as {} <{}> ({})", user.username, user.email, user.role.as_str());
            let status = client.profile_status().await?;
            if status.has_profile {
                println!("Profile {}% complete", status.profile_completion);
            } else {
                println!("No profile yet");
            }
            if let Some(step) = status.next_required_step {
                println!("Next step: {}", step);
            }
        }
        Command::Get { path } => print_json(&client.get(&path).await?)?,
        Command::Jobs { params } => print_json(&client.jobs(params).await?)?,
        Command::Stats => print_json(&client.job_statistics().await?)?,
        Command::Discover { filters } => print_json(&client.discover(filters).await?)?,
        Command::Dashboard { tab } => {
            print_json(&client.dashboard(&DashboardTab::parse(&tab)).await?)?
        }
        Command::Swipe { kind, id } => {
            let request = match kind {
                SwipeKind::Job => SwipeRequest::job(id),
                SwipeKind::Profile => SwipeRequest::profile(id),
            };
            let outcome = client.swipe(&request).await?;
            if outcome.match_created {
                println!("It's a match!");
            } else {
                println!("Swipe recorded");
            }
        }
        Command::Wishlist { action } => {
            let response = match action {
                None => client.wishlist().await?,
                Some(WishlistCommand::AddJob { job_id }) => {
                    client.add_to_wishlist(&WishlistTarget::Job(job_id)).await?
                }
                Some(WishlistCommand::AddUser { user_id }) => {
                    client.add_to_wishlist(&WishlistTarget::User(user_id)).await?
                }
                Some(WishlistCommand::Remove { wishlist_id }) => {
                    client.remove_from_wishlist(&wishlist_id).await?
                }
                Some(WishlistCommand::Clear) => client.clear_wishlist().await?,
            };
            print_json(&response)?;
        }
    }
    Ok(())
}

/// Print an API error the way the web pages would: the message, plus one
/// line per field for validation failures.
fn report(error: &ApiError) {
    eprintln!("Error: {}", error.message());
    if let Some(fields) = error.fields() {
        for (field, message) in fields {
            eprintln!("  {}: {}", field, message);
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    if !value.is_null() {
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}

/// Parse a `key=value` query parameter
fn parse_param(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))
}
