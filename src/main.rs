use std::sync::Arc;

use plan_assist::bot::Bot;
use plan_assist::channels::{Channel, CliChannel, TelegramChannel};
use plan_assist::config::{BotConfig, ChannelKind};
use plan_assist::dialog::{DialogDeps, DialogEngine, SessionStore, TracingErrorObserver};
use plan_assist::llm::create_provider;
use plan_assist::planner::{GeneratorConfig, PlanGenerator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TELEGRAM_BOT_TOKEN=123456:ABC...");
        eprintln!("  export GIGACHAT_CREDENTIALS=<authorization key>");
        std::process::exit(1);
    });

    eprintln!("📝 Plan Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.gigachat.model);
    eprintln!("   Generation timeout: {}s", config.generation_timeout.as_secs());

    // ── LLM ──────────────────────────────────────────────────────────
    let llm = create_provider(&config.gigachat)?;
    let generator = Arc::new(PlanGenerator::new(
        llm,
        GeneratorConfig {
            timeout: config.generation_timeout,
            ..GeneratorConfig::default()
        },
    ));

    // ── Channel ──────────────────────────────────────────────────────
    let channel: Arc<dyn Channel> = match (config.channel, config.telegram) {
        (ChannelKind::Telegram, Some(telegram)) => {
            eprintln!(
                "   Telegram: enabled (allowed: {})",
                if telegram.allowed_users.iter().any(|u| u == "*") {
                    "everyone".to_string()
                } else {
                    telegram.allowed_users.join(", ")
                }
            );
            Arc::new(TelegramChannel::new(
                telegram.bot_token,
                telegram.allowed_users,
            ))
        }
        (ChannelKind::Telegram, None) => {
            anyhow::bail!("Telegram channel selected without Telegram configuration")
        }
        (ChannelKind::Cli, _) => {
            eprintln!("   Channel: cli (/start, /cancel, !new_task)\n");
            Arc::new(CliChannel::new())
        }
    };

    channel.health_check().await?;

    // ── Dialog ───────────────────────────────────────────────────────
    let engine = Arc::new(DialogEngine::new(DialogDeps {
        store: Arc::new(SessionStore::new()),
        generator,
        outbox: Arc::clone(&channel),
        observer: Arc::new(TracingErrorObserver),
    }));

    Bot::new(channel, engine).run().await?;

    Ok(())
}
