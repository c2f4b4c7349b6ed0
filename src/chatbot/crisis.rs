//! Keyword-based crisis detection.
//!
//! Runs on every piece of free text before any model call. Matching is a
//! plain case-insensitive substring search, so false positives are expected.

/// Phrases that trigger the crisis branch.
pub const CRISIS_KEYWORDS: &[&str] = &[
    "suicide",
    "suicidal",
    "kill myself",
    "want to die",
    "end my life",
    "self-harm",
    "self harm",
    "hurt myself",
    "end it all",
    "no reason to live",
    "don't want to live",
    "better off dead",
];

/// Full resource list sent to standard-mode users instead of a model reply.
pub const CRISIS_RESPONSE: &str = "🚨 I'm concerned about what you've shared. Help is available right now.

📞 South African Crisis Resources:
• SADAG: 0800 567 567 (24/7)
• Lifeline SA: 0861 322 322 (24/7)
• Suicide Crisis Line: 0800 567 567
• LifeLine WhatsApp: 0600 123 456

You matter. Please reach out to one of these services. 💙";

/// Softened reminder for personal-mode users; the conversation continues after it.
pub const PERSONAL_CRISIS_NOTE: &str = "💙 I hear you, and I'm here for you. If you're in immediate danger, \
please reach out: SADAG 0800 567 567 (24/7)

Now, tell me more about what's going on...";

/// What the dispatcher should do with a message after the crisis check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrisisAction {
    /// No keyword matched.
    None,
    /// Send [`CRISIS_RESPONSE`] and skip the model call.
    Suppress,
    /// Send [`PERSONAL_CRISIS_NOTE`], then carry on with the normal flow.
    Remind,
}

/// Returns true if the text contains any crisis keyword.
pub fn detect_crisis(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CRISIS_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
}

/// Decide the crisis branch for a user in the given mode.
pub fn crisis_action(text: &str, personal_mode: bool) -> CrisisAction {
    if !detect_crisis(text) {
        CrisisAction::None
    } else if personal_mode {
        CrisisAction::Remind
    } else {
        CrisisAction::Suppress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        assert!(detect_crisis("I WANT TO DIE"));
        assert!(detect_crisis("i want to die"));
        assert_eq!(detect_crisis("I WANT TO DIE"), detect_crisis("i want to die"));
    }

    #[test]
    fn test_unrelated_text() {
        assert!(!detect_crisis("I had a great day"));
        assert!(!detect_crisis(""));
    }

    #[test]
    fn test_keyword_inside_sentence() {
        assert!(detect_crisis("Sometimes I think everyone would be better off dead without me"));
        assert!(detect_crisis("thinking about Self-Harm again"));
    }

    #[test]
    fn test_action_depends_on_mode() {
        assert_eq!(crisis_action("I want to kill myself", false), CrisisAction::Suppress);
        assert_eq!(crisis_action("I want to kill myself", true), CrisisAction::Remind);
        assert_eq!(crisis_action("hello there", true), CrisisAction::None);
        assert_eq!(crisis_action("hello there", false), CrisisAction::None);
    }
}
