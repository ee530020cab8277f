#[derive(Debug, PartialEq, Eq)]
pub enum UserCommand {
    Help,
    Who,
    Quit,
    SendMessage(String),
    Ignore,
    Unknown,
}

pub const HELP_TEXT: &str = "\
commands:
  /who   list connected clients
  /help  show this help
  /q     quit
anything else is sent as a chat message";

pub fn parse_user_command(line: &str) -> UserCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return UserCommand::Ignore;
    }

    match trimmed {
        "/help" => return UserCommand::Help,
        "/who" => return UserCommand::Who,
        "/q" | "/quit" => return UserCommand::Quit,
        _ => {}
    }

    // `//text` escapes a message that starts with a slash.
    if let Some(escaped) = trimmed.strip_prefix("//") {
        return UserCommand::SendMessage(format!("/{escaped}"));
    }
    if trimmed.starts_with('/') {
        return UserCommand::Unknown;
    }

    UserCommand::SendMessage(line.trim_end_matches(['\r', '\n']).to_string())
}
