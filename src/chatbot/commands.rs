//! Slash commands.

use teloxide::utils::command::{BotCommands, ParseError};

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "start over with a fresh conversation")]
    Start,
    #[command(description = "show this message")]
    Help,
    #[command(description = "clear conversation history")]
    Clear,
    #[command(description = "show your current mode and model")]
    Mode,
    #[command(description = "list models, or switch with /model <name>")]
    Model(String),
    #[command(description = "start a blind model comparison")]
    Test,
    #[command(description = "rate responses, e.g. /rate A:4 B:5 C:3")]
    Rate(String),
    #[command(description = "end the comparison and show results")]
    Results,
    #[command(description = "same as /results")]
    Done,
    #[command(description = "skip the current comparison round")]
    Next,
    #[command(description = "tell me something about yourself (personal mode)")]
    Context(String),
}

/// Outcome of looking at a message as a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Command(Command),
    /// Starts with `/` but is not one of ours.
    Unknown,
    NotACommand,
}

/// Parse `text`, accepting `/cmd@bot_username` addressing.
///
/// Argument-less commands tolerate trailing words (`/start please`).
pub fn parse_command(text: &str, bot_username: &str) -> Parsed {
    let text = text.trim();
    if !text.starts_with('/') {
        return Parsed::NotACommand;
    }

    match Command::parse(text, bot_username) {
        Ok(command) => Parsed::Command(command),
        Err(ParseError::TooManyArguments { .. }) => {
            let head = text.split_whitespace().next().unwrap_or(text);
            Command::parse(head, bot_username)
                .map(Parsed::Command)
                .unwrap_or(Parsed::Unknown)
        }
        Err(_) => Parsed::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOT: &str = "mindmate_bot";

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello there", BOT), Parsed::NotACommand);
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("/start", BOT), Parsed::Command(Command::Start));
        assert_eq!(parse_command("/done", BOT), Parsed::Command(Command::Done));
        assert_eq!(parse_command("/next", BOT), Parsed::Command(Command::Next));
    }

    #[test]
    fn test_arguments() {
        assert_eq!(
            parse_command("/model 4.1-mini", BOT),
            Parsed::Command(Command::Model("4.1-mini".to_string()))
        );
        assert_eq!(
            parse_command("/rate A:4 B:5 C:3", BOT),
            Parsed::Command(Command::Rate("A:4 B:5 C:3".to_string()))
        );
        assert_eq!(
            parse_command("/context I work night shifts", BOT),
            Parsed::Command(Command::Context("I work night shifts".to_string()))
        );
    }

    #[test]
    fn test_model_without_argument_lists() {
        assert_eq!(
            parse_command("/model", BOT),
            Parsed::Command(Command::Model(String::new()))
        );
    }

    #[test]
    fn test_addressed_to_bot() {
        assert_eq!(parse_command("/help@mindmate_bot", BOT), Parsed::Command(Command::Help));
    }

    #[test]
    fn test_trailing_words_on_unit_command() {
        assert_eq!(parse_command("/start please", BOT), Parsed::Command(Command::Start));
    }

    #[test]
    fn test_unknown() {
        assert_eq!(parse_command("/launch", BOT), Parsed::Unknown);
    }
}
