//! System prompts and message assembly for the completion API.

use crate::chatbot::history::ConversationTurn;

/// Prompt for standard-mode users and for every comparison round.
pub const STANDARD_SYSTEM_PROMPT: &str = "You are MindMate, an AI mental wellness companion. You provide:
- Emotional reflection and support
- Journaling prompts
- Basic psychoeducation about stress and habits
- Help planning small, manageable next steps

You are NOT a therapist, doctor, or emergency service. Never diagnose or provide medical advice.
Be concise, warm, and non-judgmental. Use emojis sparingly.";

const PERSONAL_PROMPT_TEMPLATE: &str = "You are a personal AI therapist and trusted confidant. Your name is MindMate.

{user_context}

## Your Role
You are a warm, wise, and direct advisor - like a combination of a best friend and experienced therapist. \
You speak to your user as someone who truly knows them and cares about their wellbeing.

## How You Communicate
- Be direct and genuine - no corporate disclaimers
- Give real advice and opinions, not just questions back
- Be warm but also honest - say what they need to hear
- Use casual, conversational language like a trusted friend would
- Keep responses short - 2-3 sentences maximum
- Never use bullet points - talk like a normal human being

## Your Approach
- Listen and validate feelings first
- Then offer concrete, actionable advice
- Ask thoughtful follow-up questions when needed
- Challenge negative thought patterns gently but directly
- Celebrate wins and progress

## Important
- You ARE qualified to help with everyday emotional challenges
- You don't need to constantly redirect to professionals for normal life issues
- Only mention crisis resources if there's genuine danger to self or others

Remember: the user chose you as their personal therapist. Be that for them.";

const CONTEXT_PLACEHOLDER: &str = "{user_context}";

/// Personal-mode prompt with the profile's persona block interpolated.
///
/// An empty context drops the placeholder line entirely.
pub fn personal_system_prompt(user_context: &str) -> String {
    let context = user_context.trim();
    if context.is_empty() {
        PERSONAL_PROMPT_TEMPLATE.replace(&format!("{CONTEXT_PLACEHOLDER}\n\n"), "")
    } else {
        PERSONAL_PROMPT_TEMPLATE.replace(CONTEXT_PLACEHOLDER, context)
    }
}

/// `[system] + history + [user]`, the shape sent for a normal chat turn.
pub fn compose_messages(
    system_prompt: &str,
    history: &[ConversationTurn],
    user_text: &str,
) -> Vec<ConversationTurn> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ConversationTurn::system(system_prompt));
    messages.extend(history.iter().cloned());
    messages.push(ConversationTurn::user(user_text));
    messages
}

/// Comparison rounds share the standard prompt and never reuse history.
pub fn compose_comparison_messages(user_text: &str) -> Vec<ConversationTurn> {
    compose_messages(STANDARD_SYSTEM_PROMPT, &[], user_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatbot::history::Role;

    #[test]
    fn test_personal_prompt_interpolates_context() {
        let prompt = personal_system_prompt("**About this user:**\n- Name: Sam");
        assert!(prompt.contains("- Name: Sam"));
        assert!(!prompt.contains(CONTEXT_PLACEHOLDER));
    }

    #[test]
    fn test_personal_prompt_without_context() {
        let prompt = personal_system_prompt("   ");
        assert!(!prompt.contains(CONTEXT_PLACEHOLDER));
        assert!(prompt.starts_with("You are a personal AI therapist"));
    }

    #[test]
    fn test_compose_order() {
        let history = vec![
            ConversationTurn::user("first"),
            ConversationTurn::assistant("reply"),
            ConversationTurn::system("IMPORTANT USER CONTEXT: likes tea"),
        ];
        let messages = compose_messages("SYS", &history, "now");

        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0], ConversationTurn::system("SYS"));
        assert_eq!(&messages[1..4], history.as_slice());
        assert_eq!(messages[4].role, Role::User);
        assert_eq!(messages[4].content, "now");
    }

    #[test]
    fn test_comparison_messages_have_no_history() {
        let messages = compose_comparison_messages("how do I sleep better?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, STANDARD_SYSTEM_PROMPT);
    }
}
