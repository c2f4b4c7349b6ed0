//! User-facing reply texts.

use std::fmt::Write as _;

use teloxide::utils::command::BotCommands;

use crate::chatbot::commands::Command;
use crate::chatbot::comparison::{ComparisonError, LabeledResponse, MAX_SCORE, MIN_SCORE};

pub const WELCOME: &str = "Hello! I'm MindMate, your AI wellness companion. 🌱

I can help you with:
• Emotional reflection and journaling prompts
• Information about stress and healthy habits
• Planning small, manageable next steps

⚠️ I am NOT a therapist or emergency service.

How are you feeling today?";

const PERSONAL_WELCOME_BODY: &str = "🔓 Personal Mode Active

I'm your personal AI therapist - here to give you direct, honest support without the corporate disclaimers.

What's on your mind today? 💙";

/// `/start` greeting for personal-mode users, by name when the profile has one.
pub fn personal_welcome(name: Option<&str>) -> String {
    match name {
        Some(name) => format!("👋 Welcome back, {name}!\n\n{PERSONAL_WELCOME_BODY}"),
        None => format!("👋 Welcome back!\n\n{PERSONAL_WELCOME_BODY}"),
    }
}

pub const HISTORY_CLEARED: &str = "Conversation history cleared. 🧹";
pub const APOLOGY: &str = "I'm having trouble right now. Please try again. 💙";
pub const VOICE_FAILED: &str = "❌ Voice processing failed. Please try again.";
pub const VOICE_CAPTION_PREFIX: &str = "🎤 Voice Response:\n\n";
pub const VOICE_CAPTION_SHORT: &str = "🎤 Full response below:";
pub const UNKNOWN_COMMAND: &str = "I don't know that command. Use /help to see what I can do.";
pub const PERSONAL_ONLY: &str = "This feature is only available in Personal Mode.";
pub const UPLOAD_PERSONAL_ONLY: &str = "I can only learn from documents in Personal Mode.";
pub const TEST_WAIT: &str = "🧪 Testing models... please wait...";
pub const RATE_USAGE: &str = "📊 Rate the responses (1-5):

/rate A:4 B:5 C:3

1 = Poor, 5 = Excellent";

pub const CONTEXT_USAGE: &str = "💡 Share important context about yourself:

• /context I have trouble sleeping - Share a pattern
• /context I take medication every morning - Share medications
• /context My therapist is Dr. Smith - Share treatment info

This helps me provide better, personalized support!";

pub const CONTEXT_SAVED: &str = "✅ Context saved! I'll remember this for our conversations.

💡 This helps me provide better, more personalized support.";

pub fn help_text() -> String {
    format!(
        "How I can support you:

• Send me a message about how you're feeling
• Send a voice note and I'll reply with one
• Ask for journaling prompts or reflection questions

{}

Remember: I'm here to support, not replace professional help. 💙",
        Command::descriptions()
    )
}

pub fn mode_status(
    user_id: i64,
    personal: bool,
    effective_model: &str,
    selected_model: Option<&str>,
    pinned: bool,
    test_active: bool,
) -> String {
    let mut text = if personal {
        String::from(
            "🔓 Personal Mode: ACTIVE

You have access to:
• Direct, honest advice
• Personal therapist experience
• Softer crisis handling\n\n",
        )
    } else {
        String::from("🔒 Standard Mode: ACTIVE\n\nYou're using the standard MindMate experience.\n\n")
    };

    let _ = write!(text, "Model: {effective_model}");
    if pinned {
        text.push_str(" (pinned)");
    }
    text.push('\n');
    if let Some(selected) = selected_model
        && selected != effective_model
    {
        let _ = writeln!(text, "Your /model selection: {selected}");
    }
    let _ = writeln!(text, "Blind test: {}", if test_active { "active" } else { "off" });
    let _ = write!(text, "\nUser ID: {user_id}");
    text
}

pub fn model_list(current: &str, available: &[(String, String)]) -> String {
    let mut text = String::from("🧪 A/B Testing Mode\n\n");
    let _ = writeln!(text, "Current model: {current}\n");
    text.push_str("Available models:\n");
    for (key, model) in available {
        let _ = writeln!(text, "• {key} → {model}");
    }
    text.push_str("\nUsage: /model 4.1-mini");
    text
}

pub fn model_switched(model: &str, pinned: Option<&str>) -> String {
    let mut text = format!(
        "✅ Switched to {model}\n\nHistory cleared for fresh comparison.\nStart chatting to test this model!"
    );
    if let Some(pinned) = pinned {
        let _ = write!(text, "\n\nNote: your profile pins {pinned}, which still takes precedence.");
    }
    text
}

pub fn unknown_model(key: &str, available: &[(String, String)]) -> String {
    let keys: Vec<&str> = available.iter().map(|(k, _)| k.as_str()).collect();
    format!("❌ Unknown model: {key}\n\nAvailable: {}", keys.join(", "))
}

pub fn test_started(model_count: usize) -> String {
    let labels: String = (0..model_count)
        .map(crate::chatbot::comparison::label_for)
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("/");
    format!(
        "🧪 Blind {labels} Test Started!

How it works:
1️⃣ Send any message/prompt
2️⃣ You'll get {model_count} anonymous responses
3️⃣ Rate them: /rate A:4 B:5 C:3
4️⃣ Repeat 10-20 times
5️⃣ /results to reveal models & scores

Models are hidden - you won't know which is which until the end!

📝 Send your first test message now!"
    )
}

pub const TEST_ALREADY_ACTIVE: &str = "🧪 Blind test already active!

Send a message to test, or:
• /rate A:4 B:5 C:3 - Rate responses
• /next - Skip this round
• /results - End test & see results";

pub const RATE_FIRST: &str =
    "📊 Please rate the current responses first (/rate A:4 B:5 C:3), or use /next to skip this round.";

pub const ROUND_SKIPPED: &str = "⏭️ Round skipped. Send your next test message.";

/// The whole round as one message.
pub fn comparison_round(prompt: &str, responses: &[LabeledResponse]) -> String {
    let mut text = format!("📝 Your prompt: {prompt}\n\n━━━━━━━━━━━━━━━━━━━━\n\n");
    for response in responses {
        let _ = write!(
            text,
            "Response {}:\n{}\n\n━━━━━━━━━━━━━━━━━━━━\n\n",
            response.label, response.text
        );
    }
    text.push_str(RATE_PROMPT);
    text
}

/// The same round split into one message per part, for long answers.
pub fn comparison_round_parts(prompt: &str, responses: &[LabeledResponse]) -> Vec<String> {
    let mut parts = vec![format!("📝 Your prompt: {prompt}")];
    parts.extend(
        responses
            .iter()
            .map(|r| format!("Response {}:\n{}", r.label, r.text)),
    );
    parts.push(RATE_PROMPT.to_string());
    parts
}

const RATE_PROMPT: &str = "📊 Rate them: /rate A:4 B:5 C:3\n(1 = Poor, 5 = Excellent)";

pub fn ratings_saved(completed: usize, ratings: &std::collections::BTreeMap<char, u32>) -> String {
    let scores: Vec<String> = ratings.iter().map(|(l, s)| format!("{l} = {s}")).collect();
    format!(
        "✅ Ratings saved! ({completed} tests completed)\n\n{}\n\n📝 Send another test message, or /results when done.",
        scores.join(" | ")
    )
}

pub fn comparison_error(error: &ComparisonError) -> String {
    match error {
        ComparisonError::NotActive => "❌ No active test. Use /test to start.".to_string(),
        ComparisonError::NoPendingRound => {
            "❌ No responses to rate yet. Send a test message first!".to_string()
        }
        ComparisonError::RoundPending => RATE_FIRST.to_string(),
        ComparisonError::MissingRatings(labels) => {
            let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
            format!(
                "❌ Please rate every response. Missing: {}\n\nExample: /rate A:4 B:5 C:3",
                labels.join(", ")
            )
        }
        ComparisonError::UnknownLabel(label) => {
            format!("❌ There is no response {label} in this round.")
        }
        ComparisonError::ScoreOutOfRange { label, score } => format!(
            "❌ Rating {score} for {label} is out of range. Use {MIN_SCORE} to {MAX_SCORE}."
        ),
        ComparisonError::NoResponses => APOLOGY.to_string(),
    }
}

pub fn document_saved(file_name: &str) -> String {
    format!(
        "📄 Document received! I've saved '{file_name}' for context.\n\n💡 This helps me understand your situation and provide better support."
    )
}
