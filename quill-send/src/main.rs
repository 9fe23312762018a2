//! quill-send - send one message through the publishing pipeline

use clap::Parser;
use libquillcast::backoff::BackoffPolicy;
use libquillcast::logging::{LogFormat, LoggingConfig};
use libquillcast::{
    AuditStore, Config, NullClient, PostingPipeline, PublishClient, QuillcastError, QuotaManager,
    Result, SafetyFilter, Shutdown, XApiClient,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "quill-send")]
#[command(version)]
#[command(about = "Send one message through the publishing pipeline")]
#[command(long_about = "\
quill-send - send one message through the publishing pipeline

DESCRIPTION:
    Runs a single candidate message through policy screening, the audit
    trail, quota admission, and the retried remote publish call. Every
    candidate is recorded, whatever the outcome.

    On success the remote message id is printed to stdout. A candidate
    that is rejected, denied by quota, or fails to publish is recorded
    in the audit trail and reported on stderr; this is not a process
    error.

USAGE:
    # Post from an argument
    quill-send \"Interesting upgrade shipping next week.\"

    # Post from stdin
    echo \"Quiet mempool this morning.\" | quill-send

    # Reply to a message
    quill-send --reply-to 1845 --reply-user alice \"Good question!\"

SIGNALS:
    SIGTERM, SIGINT - abort any backoff wait and exit cleanly

EXIT CODES:
    0 - Candidate processed (or shutdown requested mid-wait)
    1 - Runtime error
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Message text (reads from stdin if not provided)
    content: Option<String>,

    /// Message id to reply to
    #[arg(long, value_name = "MESSAGE_ID", requires = "reply_user")]
    reply_to: Option<String>,

    /// Username the reply targets, for per-user admission
    #[arg(long, value_name = "USER", requires = "reply_to")]
    reply_user: Option<String>,

    /// Force dry-run mode regardless of configuration
    #[arg(long)]
    dry_run: bool,

    /// Configuration file path (default: ~/.config/quillcast/config.toml)
    #[arg(short, long, value_name = "PATH", env = "QUILLCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::new(LogFormat::Text, "info".to_string(), cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if cli.dry_run {
        config.dry_run = true;
    }
    config.validate()?;

    let content = read_content(cli.content.as_deref())?;

    let shutdown = Shutdown::new();
    setup_signal_handlers(shutdown.clone())?;

    let audit = AuditStore::new(&config.database.path).await?;

    // Rebuild the rolling windows from the audit trail so restarts don't
    // forget what was already sent.
    let quota = Arc::new(QuotaManager::new(config.quota.clone()));
    let budget_window = i64::from(config.quota.write_budget_days) * 86400;
    let since = chrono::Utc::now().timestamp() - budget_window;
    let history = audit.posted_writes_since(since).await?;
    info!("Preloading quota windows from {} posted records", history.len());
    quota.preload(&history).await;

    let client: Arc<dyn PublishClient> = if config.dry_run {
        Arc::new(NullClient)
    } else {
        let api = config.api.as_ref().ok_or_else(|| {
            QuillcastError::InvalidInput("API configuration required unless dry_run".to_string())
        })?;
        Arc::new(XApiClient::from_config(api)?)
    };

    let pipeline = PostingPipeline::new(
        audit,
        quota,
        SafetyFilter::new(config.safety.clone()),
        client,
        BackoffPolicy::from(&config.backoff),
        shutdown,
        config.dry_run,
    );

    let result = match (&cli.reply_to, &cli.reply_user) {
        (Some(target), Some(user)) => {
            pipeline
                .publish_reply(&content, None, target, user)
                .await?
        }
        _ => pipeline.publish_post(&content, None).await?,
    };

    match result {
        Some(remote_id) => println!("{}", remote_id),
        None => eprintln!("Not posted; see audit trail for the reason"),
    }
    Ok(())
}

/// Content comes from the argument or, failing that, stdin.
fn read_content(arg: Option<&str>) -> Result<String> {
    let raw = match arg {
        Some(text) => text.to_string(),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .map_err(|e| QuillcastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
            buffer
        }
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(QuillcastError::InvalidInput(
            "Content cannot be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Shutdown) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| QuillcastError::InvalidInput(format!("Failed to set up signals: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.request();
        }
    });

    Ok(())
}
