mod chatbot;
mod config;
mod health;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use teloxide::prelude::*;
use teloxide::types::UpdateKind;
use teloxide::utils::command::BotCommands;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;

use chatbot::commands::Command;
use chatbot::{
    ChatbotEngine, ConversationStore, Database, EngineConfig, InboundContent, InboundMessage, ModeSelector,
    OpenAiClient, TelegramClient,
};
use config::Config;
use health::{DeliveryMode, HttpState, WebhookIntake};

const DEFAULT_CONFIG_FILE: &str = "mindmate.json";
const WEBHOOK_QUEUE_CAPACITY: usize = 256;

struct BotState {
    engine: ChatbotEngine,
}

impl BotState {
    async fn new(config: &Config, bot: &Bot) -> Result<Self, String> {
        let bot_username = match bot.get_me().await {
            Ok(me) => {
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                me.username().to_string()
            }
            Err(e) => {
                warn!("Failed to get bot info: {e}");
                String::new()
            }
        };

        let provider = OpenAiClient::new(
            config.openai_api_key.clone(),
            config.api_base_url.clone(),
            config.voice.clone(),
            config.completion_timeout,
        )
        .map_err(|e| format!("failed to build API client: {e}"))?;

        let history = match config.history_db_path() {
            Some(path) => open_history(&path, config.history_length)?,
            None => ConversationStore::new(config.history_length),
        };

        let modes = ModeSelector::new(config.personal_users.clone(), config.default_model.clone());
        info!("Personal mode users: {}", config.personal_users.len());

        let engine_config = EngineConfig {
            bot_username,
            generation: config.generation.clone(),
            completion_timeout: config.completion_timeout,
            available_models: config.model_aliases.clone(),
            comparison_models: config.comparison_models.clone(),
            reports_dir: config.reports_dir(),
            ..EngineConfig::default()
        };

        let engine = ChatbotEngine::new(
            engine_config,
            modes,
            history,
            Arc::new(TelegramClient::new(bot.clone())),
            Arc::new(provider),
        );
        Ok(Self { engine })
    }
}

fn open_history(path: &Path, max_len: usize) -> Result<ConversationStore, String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    let database = Database::open(path)?;
    Ok(ConversationStore::with_database(max_len, database))
}

fn load_config() -> Result<Config, config::ConfigError> {
    let explicit = std::env::args().nth(1).map(PathBuf::from);
    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
    match explicit {
        Some(path) => Config::load(path),
        None if default.exists() => Config::load(default),
        None => Config::from_env(),
    }
}

/// Stdout always; a non-blocking file layer too when a data dir is set.
/// The returned guard must live as long as logging does.
fn init_logging(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout).with_filter(
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
    );

    let log_file = config.data_dir.as_ref().and_then(|dir| {
        let log_dir = dir.join("logs");
        std::fs::create_dir_all(&log_dir).ok()?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("mindmate.log"))
            .ok()
    });

    match log_file {
        Some(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_filter(
                            tracing_subscriber::EnvFilter::from_default_env()
                                .add_directive(tracing::Level::INFO.into()),
                        ),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stdout_layer).init();
            None
        }
    }
}

fn enabled_features(config: &Config) -> Vec<String> {
    let mut features = vec!["crisis_detection", "blind_test", "voice", "model_selection"];
    if !config.personal_users.is_empty() {
        features.push("personal_mode");
    }
    if config.persist_history {
        features.push("history_persistence");
    }
    features.into_iter().map(String::from).collect()
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().init();
            error!("❌ {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config);

    info!("🚀 Starting MindMate...");
    match config.config_path {
        Some(ref path) => info!("Loaded config from {}", path.display()),
        None => info!("Loaded config from environment"),
    }
    info!("Default model: {}", config.default_model);
    let mode = if config.webhook_mode() { DeliveryMode::Webhook } else { DeliveryMode::Polling };
    info!("Delivery mode: {}", mode.as_str());

    let bot = Bot::new(&config.telegram_bot_token);
    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        warn!("Failed to register command list: {e}");
    }

    let state = match BotState::new(&config, &bot).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("❌ {e}");
            std::process::exit(1);
        }
    };

    let running = Arc::new(AtomicBool::new(false));
    let features = enabled_features(&config);

    if let Some(webhook_url) = config.webhook_url() {
        let (tx, rx) = mpsc::channel(WEBHOOK_QUEUE_CAPACITY);
        let http_state = HttpState::new(mode, running.clone())
            .with_webhook(WebhookIntake::new(tx, config.webhook_secret.clone()))
            .with_features(features);
        spawn_http(config.port, http_state);

        let mut request = bot.set_webhook(webhook_url.clone()).drop_pending_updates(true);
        if let Some(ref secret) = config.webhook_secret {
            request = request.secret_token(secret.clone());
        }
        if let Err(e) = request.await {
            error!("❌ Failed to register webhook {webhook_url}: {e}");
            std::process::exit(1);
        }
        info!("🔗 Webhook registered at {webhook_url}");

        running.store(true, Ordering::SeqCst);
        tokio::select! {
            _ = run_webhook_worker(rx, state) => warn!("Webhook queue closed"),
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl-C, shutting down"),
        }
    } else {
        let http_state = HttpState::new(mode, running.clone()).with_features(features);
        spawn_http(config.port, http_state);

        if let Err(e) = bot.delete_webhook().await {
            warn!("Failed to clear webhook before polling: {e}");
        }
        info!("📡 Polling for updates");

        let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

        running.store(true, Ordering::SeqCst);
        Dispatcher::builder(bot, handler)
            .dependencies(dptree::deps![state])
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    }

    running.store(false, Ordering::SeqCst);
    info!("👋 MindMate stopped");
}

fn spawn_http(port: u16, state: HttpState) {
    tokio::spawn(async move {
        if let Err(e) = health::serve(port, state).await {
            error!("Health server failed: {e}");
        }
    });
}

/// Drain webhook updates into the same path polling uses, one at a time.
async fn run_webhook_worker(mut rx: mpsc::Receiver<Update>, state: Arc<BotState>) {
    while let Some(update) = rx.recv().await {
        let UpdateKind::Message(msg) = update.kind else {
            debug!("Ignoring non-message update {}", update.id.0);
            continue;
        };
        handle_new_message(msg, state.clone()).await.ok();
    }
}

async fn handle_new_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(inbound) = telegram_to_inbound(&msg) else {
        return Ok(());
    };
    info!("📨 Message from {} ({})", inbound.username, inbound.user_id);
    state.engine.handle_message(inbound).await;
    Ok(())
}

fn telegram_to_inbound(msg: &Message) -> Option<InboundMessage> {
    let user = msg.from.as_ref()?;
    let username = user.username.as_deref().unwrap_or(&user.first_name).to_string();

    let content = if let Some(text) = msg.text() {
        InboundContent::Text(text.to_string())
    } else if let Some(voice) = msg.voice() {
        InboundContent::Voice { file_id: voice.file.id.0.clone() }
    } else if let Some(audio) = msg.audio() {
        InboundContent::Voice { file_id: audio.file.id.0.clone() }
    } else if let Some(doc) = msg.document() {
        let file_name = doc.file_name.clone().unwrap_or_else(|| "document".to_string());
        InboundContent::Upload { file_name }
    } else if msg.photo().is_some() {
        InboundContent::Upload { file_name: "photo.jpg".to_string() }
    } else {
        return None;
    };

    Some(InboundMessage {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        user_id: user.id.0 as i64,
        username,
        content,
    })
}
