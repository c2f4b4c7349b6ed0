//! Chatbot engine - routes inbound messages through crisis checks,
//! blind tests and normal chat.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::chatbot::commands::{parse_command, Command, Parsed};
use crate::chatbot::comparison::{fan_out, parse_ratings, ComparisonTests, TestReport};
use crate::chatbot::completion::{with_timeout, CompletionProvider, CompletionRequest, GenerationSettings};
use crate::chatbot::crisis::{crisis_action, CrisisAction, CRISIS_RESPONSE, PERSONAL_CRISIS_NOTE};
use crate::chatbot::dedup::{ProcessedMessages, MAX_PROCESSED_MESSAGES};
use crate::chatbot::history::{ConversationStore, ConversationTurn};
use crate::chatbot::message::{preview, split_message, InboundContent, InboundMessage, TELEGRAM_CHUNK_CHARS};
use crate::chatbot::profile::ModeSelector;
use crate::chatbot::prompt::{compose_comparison_messages, compose_messages};
use crate::chatbot::replies;
use crate::chatbot::telegram::ChatTransport;

/// Longest reply that still fits in a voice caption.
pub const VOICE_CAPTION_MAX_CHARS: usize = 800;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Used to accept `/cmd@bot_username`.
    pub bot_username: String,
    pub generation: GenerationSettings,
    /// Deadline for each provider call.
    pub completion_timeout: Duration,
    /// `/model` aliases, in display order.
    pub available_models: Vec<(String, String)>,
    /// Blind-test candidates.
    pub comparison_models: Vec<String>,
    /// Where blind-test reports go. None disables export.
    pub reports_dir: Option<PathBuf>,
    pub dedup_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bot_username: String::new(),
            generation: GenerationSettings::default(),
            completion_timeout: Duration::from_secs(45),
            available_models: default_model_aliases(),
            comparison_models: default_comparison_models(),
            reports_dir: None,
            dedup_capacity: MAX_PROCESSED_MESSAGES,
        }
    }
}

pub fn default_model_aliases() -> Vec<(String, String)> {
    [
        ("4o-mini", "gpt-4o-mini"),
        ("4.1-mini", "gpt-4.1-mini"),
        ("4.1", "gpt-4.1"),
        ("5-mini", "gpt-5-mini"),
        ("5.2", "gpt-5.2"),
        ("3.5", "gpt-3.5-turbo"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn default_comparison_models() -> Vec<String> {
    ["gpt-4o-mini", "gpt-4.1-mini", "gpt-5.2"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// How a normal chat reply is delivered.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ReplyKind {
    Text,
    Voice,
}

/// The chatbot engine.
pub struct ChatbotEngine {
    config: EngineConfig,
    modes: ModeSelector,
    history: ConversationStore,
    tests: ComparisonTests,
    processed: Mutex<ProcessedMessages<(i64, i64)>>,
    transport: Arc<dyn ChatTransport>,
    provider: Arc<dyn CompletionProvider>,
}

impl ChatbotEngine {
    pub fn new(
        config: EngineConfig,
        modes: ModeSelector,
        history: ConversationStore,
        transport: Arc<dyn ChatTransport>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Self {
        let processed = Mutex::new(ProcessedMessages::new(config.dedup_capacity));
        Self {
            config,
            modes,
            history,
            tests: ComparisonTests::new(),
            processed,
            transport,
            provider,
        }
    }

    pub fn modes(&self) -> &ModeSelector {
        &self.modes
    }

    pub fn history(&self) -> &ConversationStore {
        &self.history
    }

    pub fn tests(&self) -> &ComparisonTests {
        &self.tests
    }

    /// Handle one inbound message. Never fails: every error ends in a reply
    /// to the user or a log line.
    pub async fn handle_message(&self, msg: InboundMessage) {
        if !self.mark_processed(msg.dedup_key()) {
            debug!(
                "Dropping redelivered message {} in chat {}",
                msg.message_id, msg.chat_id
            );
            return;
        }

        match &msg.content {
            InboundContent::Text(text) => self.handle_text(&msg, text).await,
            InboundContent::Voice { file_id } => self.handle_voice(&msg, file_id).await,
            InboundContent::Upload { file_name } => self.handle_upload(&msg, file_name).await,
        }
    }

    fn mark_processed(&self, key: (i64, i64)) -> bool {
        let mut processed = self.processed.lock().unwrap_or_else(PoisonError::into_inner);
        processed.insert(key)
    }

    async fn handle_text(&self, msg: &InboundMessage, text: &str) {
        match parse_command(text, &self.config.bot_username) {
            Parsed::Command(command) => self.handle_command(msg, command).await,
            Parsed::Unknown => {
                debug!("Unknown command from {}: {}", msg.user_id, preview(text, 30));
                self.reply(msg.chat_id, replies::UNKNOWN_COMMAND).await;
            }
            Parsed::NotACommand => self.handle_free_text(msg, text, ReplyKind::Text).await,
        }
    }

    /// Free text from any source: typed, or transcribed from voice.
    async fn handle_free_text(&self, msg: &InboundMessage, text: &str, kind: ReplyKind) {
        let user_id = msg.user_id;
        let personal = self.modes.is_personal_mode(user_id);

        match crisis_action(text, personal) {
            CrisisAction::Suppress => {
                warn!("🚨 Crisis keywords from user {} (standard mode)", user_id);
                self.reply(msg.chat_id, CRISIS_RESPONSE).await;
                return;
            }
            CrisisAction::Remind => {
                warn!("🚨 Crisis keywords from user {} (personal mode)", user_id);
                self.reply(msg.chat_id, PERSONAL_CRISIS_NOTE).await;
            }
            CrisisAction::None => {}
        }

        if self.tests.is_active(user_id) {
            self.run_comparison_round(msg, text).await;
            return;
        }

        self.chat(msg, text, kind).await;
    }

    async fn chat(&self, msg: &InboundMessage, text: &str, kind: ReplyKind) {
        let user_id = msg.user_id;
        let model = self.modes.resolve_model(user_id);
        let system_prompt = self.modes.resolve_system_prompt(user_id);
        let history = self.history.get_history(user_id);

        info!(
            "📨 {} ({}) [{}] model={}: \"{}\"",
            self.modes.display_name(user_id).unwrap_or(&msg.username),
            user_id,
            if self.modes.is_personal_mode(user_id) { "PERSONAL" } else { "STANDARD" },
            model,
            preview(text, 50)
        );

        let messages = compose_messages(&system_prompt, &history, text);
        let mut request = CompletionRequest::new(model, messages, &self.config.generation);
        if kind == ReplyKind::Voice {
            request = request.with_max_tokens(self.config.generation.voice_max_tokens);
        }

        let reply = match with_timeout(self.config.completion_timeout, self.provider.complete(&request)).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Completion failed for user {}: {}", user_id, e);
                self.reply(msg.chat_id, replies::APOLOGY).await;
                return;
            }
        };

        self.history.append_exchange(user_id, text, &reply);

        match kind {
            ReplyKind::Text => self.reply(msg.chat_id, &reply).await,
            ReplyKind::Voice => self.reply_with_voice(msg.chat_id, &reply).await,
        }
        info!("Responded to user {}", user_id);
    }

    async fn handle_voice(&self, msg: &InboundMessage, file_id: &str) {
        let audio = match self.transport.download_file(file_id).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Voice download failed for user {}: {}", msg.user_id, e);
                self.reply(msg.chat_id, replies::VOICE_FAILED).await;
                return;
            }
        };

        let transcript = match with_timeout(
            self.config.completion_timeout,
            self.provider.transcribe(audio, "voice.ogg"),
        )
        .await
        {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("Empty transcription for user {}", msg.user_id);
                self.reply(msg.chat_id, replies::VOICE_FAILED).await;
                return;
            }
            Err(e) => {
                error!("Transcription failed for user {}: {}", msg.user_id, e);
                self.reply(msg.chat_id, replies::VOICE_FAILED).await;
                return;
            }
        };

        info!("🎤 User {} said: \"{}\"", msg.user_id, preview(&transcript, 50));
        // Transcripts are never treated as commands.
        self.handle_free_text(msg, &transcript, ReplyKind::Voice).await;
    }

    /// Speak the reply; fall back to text whenever audio can't be delivered.
    async fn reply_with_voice(&self, chat_id: i64, reply: &str) {
        let audio = match with_timeout(self.config.completion_timeout, self.provider.synthesize(reply)).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Speech synthesis failed, replying with text: {}", e);
                self.reply(chat_id, reply).await;
                return;
            }
        };

        if reply.chars().count() <= VOICE_CAPTION_MAX_CHARS {
            let caption = format!("{}{}", replies::VOICE_CAPTION_PREFIX, reply);
            if self.transport.send_voice(chat_id, audio, Some(&caption)).await.is_err() {
                self.reply(chat_id, reply).await;
            }
        } else {
            // The full text follows either way; only the audio is lost on failure.
            if let Err(e) = self
                .transport
                .send_voice(chat_id, audio, Some(replies::VOICE_CAPTION_SHORT))
                .await
            {
                warn!("Voice reply to chat {} failed, sending text only: {}", chat_id, e);
            }
            self.reply(chat_id, reply).await;
        }
    }

    async fn handle_upload(&self, msg: &InboundMessage, file_name: &str) {
        if !self.modes.is_personal_mode(msg.user_id) {
            self.reply(msg.chat_id, replies::UPLOAD_PERSONAL_ONLY).await;
            return;
        }

        self.history.append(
            msg.user_id,
            ConversationTurn::system(format!("User shared document: {file_name}")),
        );
        info!("📄 User {} shared {}", msg.user_id, file_name);
        self.reply(msg.chat_id, &replies::document_saved(file_name)).await;
    }

    async fn handle_command(&self, msg: &InboundMessage, command: Command) {
        let user_id = msg.user_id;
        let chat_id = msg.chat_id;
        debug!("Command from {}: {:?}", user_id, command);

        match command {
            Command::Start => {
                self.history.clear(user_id);
                let personal = self.modes.is_personal_mode(user_id);
                info!(
                    "User {} started bot [{}]",
                    user_id,
                    if personal { "PERSONAL" } else { "STANDARD" }
                );
                let greeting = if personal {
                    replies::personal_welcome(self.modes.display_name(user_id))
                } else {
                    replies::WELCOME.to_string()
                };
                self.reply(chat_id, &greeting).await;
            }
            Command::Help => self.reply(chat_id, &replies::help_text()).await,
            Command::Clear => {
                self.history.clear(user_id);
                info!("User {} cleared history", user_id);
                self.reply(chat_id, replies::HISTORY_CLEARED).await;
            }
            Command::Mode => {
                let selected = self.modes.selected_model(user_id);
                let status = replies::mode_status(
                    user_id,
                    self.modes.is_personal_mode(user_id),
                    &self.modes.resolve_model(user_id),
                    selected.as_deref(),
                    self.modes.pinned_model(user_id).is_some(),
                    self.tests.is_active(user_id),
                );
                self.reply(chat_id, &status).await;
            }
            Command::Model(arg) => self.switch_model(msg, arg.trim()).await,
            Command::Test => {
                let text = if self.tests.start(user_id) {
                    info!("User {} started a blind test", user_id);
                    replies::test_started(self.config.comparison_models.len())
                } else {
                    replies::TEST_ALREADY_ACTIVE.to_string()
                };
                self.reply(chat_id, &text).await;
            }
            Command::Rate(args) => self.rate(msg, args.trim()).await,
            Command::Results | Command::Done => self.finish_test(msg).await,
            Command::Next => {
                let text = match self.tests.skip_round(user_id) {
                    Ok(()) => replies::ROUND_SKIPPED.to_string(),
                    Err(e) => replies::comparison_error(&e),
                };
                self.reply(chat_id, &text).await;
            }
            Command::Context(text) => self.add_context(msg, text.trim()).await,
        }
    }

    async fn switch_model(&self, msg: &InboundMessage, arg: &str) {
        let user_id = msg.user_id;
        let available = &self.config.available_models;

        if arg.is_empty() {
            let current = self.modes.resolve_model(user_id);
            self.reply(msg.chat_id, &replies::model_list(&current, available)).await;
            return;
        }

        let key = arg.to_lowercase();
        let model = available
            .iter()
            .find(|(alias, model)| *alias == key || *model == key)
            .map(|(_, model)| model.clone());

        let Some(model) = model else {
            self.reply(msg.chat_id, &replies::unknown_model(arg, available)).await;
            return;
        };

        self.modes.select_model(user_id, model.as_str());
        self.history.clear(user_id);
        if self.tests.cancel(user_id) {
            info!("Blind test for user {} cancelled by model switch", user_id);
        }
        info!("User {} switched to model: {}", user_id, model);

        let text = replies::model_switched(&model, self.modes.pinned_model(user_id));
        self.reply(msg.chat_id, &text).await;
    }

    async fn add_context(&self, msg: &InboundMessage, text: &str) {
        let personal = self.modes.is_personal_mode(msg.user_id);
        match crisis_action(text, personal) {
            CrisisAction::Suppress => {
                warn!("🚨 Crisis keywords in /context from user {} (standard mode)", msg.user_id);
                self.reply(msg.chat_id, CRISIS_RESPONSE).await;
                return;
            }
            CrisisAction::Remind => {
                warn!("🚨 Crisis keywords in /context from user {} (personal mode)", msg.user_id);
                self.reply(msg.chat_id, PERSONAL_CRISIS_NOTE).await;
            }
            CrisisAction::None => {}
        }

        if !personal {
            self.reply(msg.chat_id, replies::PERSONAL_ONLY).await;
            return;
        }
        if text.is_empty() {
            self.reply(msg.chat_id, replies::CONTEXT_USAGE).await;
            return;
        }

        self.history.append(
            msg.user_id,
            ConversationTurn::system(format!("IMPORTANT USER CONTEXT: {text}")),
        );
        info!("User {} added context: \"{}\"", msg.user_id, preview(text, 50));
        self.reply(msg.chat_id, replies::CONTEXT_SAVED).await;
    }

    async fn run_comparison_round(&self, msg: &InboundMessage, text: &str) {
        let user_id = msg.user_id;
        if self.tests.has_pending(user_id) {
            self.reply(msg.chat_id, replies::RATE_FIRST).await;
            return;
        }

        info!("🧪 Blind test message from user {}", user_id);
        self.reply(msg.chat_id, replies::TEST_WAIT).await;

        let messages = compose_comparison_messages(text);
        let responses = fan_out(
            self.provider.as_ref(),
            &self.config.comparison_models,
            &messages,
            &self.config.generation,
            self.config.completion_timeout,
        )
        .await;

        // The thread rng is not Send; keep it out of any await.
        let round = self.tests.begin_round(user_id, text, responses, &mut rand::rng());

        match round {
            Ok(labeled) => {
                let full = replies::comparison_round(text, &labeled);
                if full.chars().count() > TELEGRAM_CHUNK_CHARS {
                    for part in replies::comparison_round_parts(text, &labeled) {
                        self.reply(msg.chat_id, &part).await;
                    }
                } else {
                    self.reply(msg.chat_id, &full).await;
                }
            }
            Err(e) => {
                warn!("Could not open a round for user {}: {}", user_id, e);
                self.reply(msg.chat_id, &replies::comparison_error(&e)).await;
            }
        }
    }

    async fn rate(&self, msg: &InboundMessage, args: &str) {
        let user_id = msg.user_id;
        let ratings = parse_ratings(args);

        // Nothing parseable: show usage, unless there is nothing to rate anyway.
        if ratings.is_empty() && self.tests.has_pending(user_id) {
            self.reply(msg.chat_id, replies::RATE_USAGE).await;
            return;
        }

        let text = match self.tests.submit_ratings(user_id, &ratings) {
            Ok(completed) => {
                info!("User {} rated round {}", user_id, completed);
                replies::ratings_saved(completed, &ratings)
            }
            Err(e) => {
                debug!("Rejected ratings from {}: {}", user_id, e);
                replies::comparison_error(&e)
            }
        };
        self.reply(msg.chat_id, &text).await;
    }

    async fn finish_test(&self, msg: &InboundMessage) {
        let report = match self.tests.end(msg.user_id) {
            Ok(report) => report,
            Err(e) => {
                self.reply(msg.chat_id, &replies::comparison_error(&e)).await;
                return;
            }
        };

        info!(
            "🏁 Blind test ended for user {} after {} round(s)",
            msg.user_id,
            report.rounds.len()
        );

        if let Some(dir) = &self.config.reports_dir
            && !report.rounds.is_empty()
        {
            match write_report(dir, msg.user_id, &report) {
                Ok(path) => info!("Saved blind test report to {}", path.display()),
                Err(e) => warn!("{}", e),
            }
        }

        self.reply(msg.chat_id, &report.summary()).await;
    }

    /// Send text, chunked to Telegram's limit. Send failures are logged by the
    /// transport and otherwise ignored.
    async fn reply(&self, chat_id: i64, text: &str) {
        for chunk in split_message(text, TELEGRAM_CHUNK_CHARS) {
            if self.transport.send_text(chat_id, &chunk).await.is_err() {
                break;
            }
        }
    }
}

/// Write a markdown report to `dir/blind_test_<timestamp>_<user>.md`.
pub fn write_report(dir: &Path, user_id: i64, report: &TestReport) -> Result<PathBuf, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create reports dir {}: {e}", dir.display()))?;

    let now = chrono::Utc::now();
    let path = dir.join(format!("blind_test_{}_{}.md", now.format("%Y%m%d_%H%M%S"), user_id));
    let markdown = report.to_markdown(&now.format("%Y-%m-%d %H:%M:%S UTC").to_string());

    std::fs::write(&path, markdown)
        .map_err(|e| format!("Failed to write report {}: {e}", path.display()))?;
    Ok(path)
}
