mod broadcast;
mod telegram;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tickler_core::capability::Notifier;
use tickler_core::timezone::UserTimezones;
use tickler_core::{
    DueSelector, MessageHandler, OpenAiIntentParser, OpenAiTranscriber, PromptConfig, Requester,
    Scheduler, SystemClock, TicklerConfig,
};
use tickler_db::TicklerDb;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::broadcast::Audience;
use crate::telegram::{TelegramApi, TelegramNotifier};

#[derive(Parser)]
#[command(name = "tickler")]
#[command(about = "Chat reminder assistant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Database file path (overrides config)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot: deliver due reminders and answer chat messages
    Run {
        /// Only deliver reminders; do not read incoming messages
        #[arg(long)]
        no_listen: bool,
    },
    /// Run one message through the assistant as if a user sent it
    Say {
        #[arg(long)]
        chat: i64,
        #[arg(long)]
        user: i64,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Send a message to one chat or to every known chat
    Broadcast {
        /// Send to every chat with reminders or preferences
        #[arg(long, conflicts_with = "chat")]
        all: bool,
        /// Send to a single chat
        #[arg(long)]
        chat: Option<i64>,
        /// Message text; read from stdin when omitted
        #[arg(long, short = 'm')]
        message: Option<String>,
    },
    /// Show or change a user's timezone
    Timezone {
        #[command(subcommand)]
        cmd: TimezoneCommands,
    },
}

#[derive(Subcommand)]
enum TimezoneCommands {
    Get {
        #[arg(long)]
        user: i64,
    },
    Set {
        #[arg(long)]
        user: i64,
        /// IANA zone name, e.g. Europe/Moscow
        zone: String,
    },
}

fn init_tracing(config: &TicklerConfig, debug: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let default_filter = if debug {
        "tickler=debug,tickler_core=debug,tickler_db=debug,info"
    } else {
        "tickler=info,tickler_core=info,tickler_db=info,warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let terminal_layer = fmt::layer()
        .with_target(debug)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .compact();

    let (file_layer, guard) = match &config.logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "tickler.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new(
                    "tickler=debug,tickler_core=debug,tickler_db=debug,info",
                ));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(terminal_layer.with_filter(env_filter))
        .with(file_layer)
        .init();
    guard
}

async fn open_db(config: &TicklerConfig) -> Result<TicklerDb> {
    info!("Opening database at {}", config.database.path.display());
    Ok(TicklerDb::open(&config.database.path).await?)
}

fn telegram(config: &TicklerConfig) -> Result<TelegramApi> {
    Ok(TelegramApi::new(config.require_telegram_token()?)?)
}

fn message_handler(
    config: &TicklerConfig,
    db: &TicklerDb,
    notifier: Arc<dyn Notifier>,
) -> Result<MessageHandler> {
    let prompt = PromptConfig::from_config(config)?;
    let timeout = config.llm.timeout();
    let parser = OpenAiIntentParser::new(prompt.clone(), timeout)?;
    let transcriber = OpenAiTranscriber::new(prompt, timeout)?;
    Ok(MessageHandler::new(
        db.clone(),
        config.default_zone()?,
        Arc::new(parser),
        notifier,
        Arc::new(SystemClock),
        timeout,
    )
    .with_transcriber(Arc::new(transcriber)))
}

async fn run(config: &TicklerConfig, listen: bool) -> Result<()> {
    let api = telegram(config)?;
    let db = open_db(config).await?;
    db.health_check().await?;

    let stats = db.stats().await?;
    info!(
        pending = stats.pending_reminders,
        recurring = stats.active_recurring,
        users = stats.known_users,
        "database ready"
    );

    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(api.clone()));
    let handler = if listen {
        Some(message_handler(config, &db, notifier.clone())?)
    } else {
        None
    };
    let selector = DueSelector::new(
        db.clone(),
        config.default_zone()?,
        config.scheduler.recurring_grace(),
    );
    let scheduler = Scheduler::new(
        db.clone(),
        selector,
        notifier.clone(),
        Arc::new(SystemClock),
        config.scheduler.clone(),
    );
    info!(policy = %config.scheduler.delivery_policy, "starting scheduler");

    let shutdown = CancellationToken::new();
    let scheduler_handle = scheduler.start(shutdown.clone());
    let listener = match handler {
        Some(handler) => Some(tokio::spawn(telegram::poll_updates(
            api,
            handler,
            shutdown.clone(),
        ))),
        None => {
            info!("Not listening for messages");
            None
        }
    };

    tokio::signal::ctrl_c().await.into_diagnostic()?;
    info!("Shutting down");
    shutdown.cancel();

    scheduler_handle.join().await;
    if let Some(listener) = listener {
        if let Err(e) = listener.await {
            warn!("message listener ended abnormally: {:?}", e);
        }
    }

    if let Err(e) = db.checkpoint().await {
        warn!("WAL checkpoint failed: {:?}", e);
    }
    db.close().await;
    info!("Stopped");
    Ok(())
}

async fn say(config: &TicklerConfig, who: Requester, text: &str) -> Result<()> {
    let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::new(telegram(config)?));
    let db = open_db(config).await?;
    let handler = message_handler(config, &db, notifier)?;
    handler.handle_text(who, text).await?;
    db.close().await;
    Ok(())
}

async fn run_broadcast(
    config: &TicklerConfig,
    audience: Audience,
    message: Option<String>,
) -> Result<()> {
    let message = broadcast::resolve_message(message, std::io::stdin())?;
    let notifier = TelegramNotifier::new(telegram(config)?);
    let db = open_db(config).await?;

    let chat_ids = broadcast::recipients(&db, audience).await?;
    info!(recipients = chat_ids.len(), "broadcasting");
    let report = broadcast::broadcast(&notifier, &chat_ids, &message).await;
    db.close().await;

    println!("Sent: {}, failed: {}", report.sent, report.failed);
    Ok(())
}

async fn timezone(config: &TicklerConfig, cmd: TimezoneCommands) -> Result<()> {
    let db = open_db(config).await?;
    let timezones = UserTimezones::new(db.clone(), config.default_zone()?);
    let result = match cmd {
        TimezoneCommands::Get { user } => timezones.timezone_of(user).await,
        TimezoneCommands::Set { user, zone } => timezones.set_timezone(user, &zone).await,
    };
    db.close().await;
    println!("{}", result?.name());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .context_lines(3)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    let mut config = TicklerConfig::load(cli.config.as_deref()).await?;
    if let Some(db_path) = cli.db_path {
        config.database.path = db_path;
    }
    let _log_guard = init_tracing(&config, cli.debug || config.logging.debug);

    match cli.command {
        Commands::Run { no_listen } => run(&config, !no_listen).await,
        Commands::Say { chat, user, text } => {
            let who = Requester {
                chat_id: chat,
                user_id: user,
            };
            say(&config, who, &text.join(" ")).await
        }
        Commands::Broadcast { all, chat, message } => {
            let audience = Audience::from_flags(all, chat)?;
            run_broadcast(&config, audience, message).await
        }
        Commands::Timezone { cmd } => timezone(&config, cmd).await,
    }
}
