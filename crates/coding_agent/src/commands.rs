#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    /// Runs the remaining text as one turn with planning enabled.
    Plan(String),
    Quit,
    Unknown(String),
}

pub const HELP_TEXT: &str = "Commands: /help, /plan <request>, /quit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/plan" => SlashCommand::Plan(rest.to_string()),
        "/quit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("fix the build"), None);
    }

    #[test]
    fn plan_keeps_the_request_text() {
        assert_eq!(
            parse_slash_command("  /plan  add a  test "),
            Some(SlashCommand::Plan("add a  test".to_string()))
        );
        assert_eq!(
            parse_slash_command("/plan"),
            Some(SlashCommand::Plan(String::new()))
        );
    }

    #[test]
    fn unknown_commands_report_the_command_word() {
        assert_eq!(
            parse_slash_command("/clear now"),
            Some(SlashCommand::Unknown("/clear".to_string()))
        );
        assert_eq!(parse_slash_command("/quit"), Some(SlashCommand::Quit));
        assert_eq!(parse_slash_command("/help"), Some(SlashCommand::Help));
    }
}
