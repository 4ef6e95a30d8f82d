//! Line protocol parser
//!
//! Turns one post-login input line into either chat text or a command.
//! Command spellings are case-sensitive literals.

/// A parsed post-login input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Text for the current room
    Chat(String),
    /// A `/` command
    Command(Command),
}

/// Commands available after login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/join <room>`
    Join(String),
    /// `/rooms`
    Rooms,
    /// `/leave`
    Leave,
    /// `/quit`
    Quit,
    /// `/m <user> <text>`
    Message { to: String, text: String },
    /// `/r <text>`
    Reply(String),
    /// `/rm <text>`
    Remessage(String),
    /// `/users`
    Users,
    /// `/help`, or a known command used the wrong way
    Help,
    /// Anything else starting with `/`
    Unknown,
}

impl Input {
    /// Parse a non-empty line without its terminator
    pub fn parse(line: &str) -> Input {
        if line.starts_with('/') {
            Input::Command(Command::parse(line))
        } else {
            Input::Chat(line.to_string())
        }
    }
}

impl Command {
    /// Parse a line starting with `/`
    pub fn parse(line: &str) -> Command {
        match line {
            "/rooms" => return Command::Rooms,
            "/leave" => return Command::Leave,
            "/quit" => return Command::Quit,
            "/users" => return Command::Users,
            "/help" => return Command::Help,
            _ => {}
        }

        if let Some(rest) = line.strip_prefix("/join") {
            let parts: Vec<&str> = line.split(' ').collect();
            return match parts.as_slice() {
                ["/join", room] if rest.starts_with(' ') => Command::Join(room.to_string()),
                _ if rest.is_empty() || rest.starts_with(' ') => Command::Help,
                _ => Command::Unknown,
            };
        }

        if let Some(rest) = line.strip_prefix("/m ") {
            return match rest.split_once(' ') {
                Some((to, text)) if !to.is_empty() && !text.is_empty() => Command::Message {
                    to: to.to_string(),
                    text: text.to_string(),
                },
                _ => Command::Help,
            };
        }

        if let Some(text) = line.strip_prefix("/r ") {
            return if text.is_empty() {
                Command::Help
            } else {
                Command::Reply(text.to_string())
            };
        }

        if let Some(text) = line.strip_prefix("/rm ") {
            return if text.is_empty() {
                Command::Help
            } else {
                Command::Remessage(text.to_string())
            };
        }

        match line.split(' ').next() {
            Some("/m" | "/r" | "/rm" | "/rooms" | "/leave" | "/quit" | "/users" | "/help") => {
                Command::Help
            }
            _ => Command::Unknown,
        }
    }
}
