use std::path::PathBuf;

/// One slash command typed at the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Quit,
    Login,
    Logout,
    New,
    Chats,
    /// 1-based position in the `/chats` list.
    Select(usize),
    Clear,
    Image(PathBuf),
    Camera,
    Dictate,
    /// 1-based position in the rendered message list.
    Copy(usize),
    Notify,
    Away,
    Model(Option<String>),
}

/// Why a line could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    Usage(&'static str),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(name) => write!(f, "Unknown command: {name}. Type /help for commands."),
            Self::Usage(usage) => write!(f, "Usage: {usage}"),
        }
    }
}

impl Command {
    /// Parses a line starting with `/`.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (name, argument) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match name {
            "/help" | "/h" | "/?" => Self::Help,
            "/quit" | "/exit" | "/q" => Self::Quit,
            "/login" => Self::Login,
            "/logout" => Self::Logout,
            "/new" => Self::New,
            "/chats" | "/history" => Self::Chats,
            "/select" => Self::Select(parse_position(argument, "/select <n>")?),
            "/clear" => Self::Clear,
            "/image" if argument.is_empty() => return Err(ParseError::Usage("/image <path>")),
            "/image" => Self::Image(PathBuf::from(argument)),
            "/camera" => Self::Camera,
            "/dictate" | "/mic" => Self::Dictate,
            "/copy" => Self::Copy(parse_position(argument, "/copy <n>")?),
            "/notify" => Self::Notify,
            "/away" => Self::Away,
            "/model" => Self::Model((!argument.is_empty()).then(|| argument.to_string())),
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(command)
    }

    /// Commands that work without a signed-in user.
    pub fn allowed_signed_out(&self) -> bool {
        matches!(
            self,
            Self::Help | Self::Quit | Self::Login | Self::Notify | Self::Away | Self::Model(_)
        )
    }
}

fn parse_position(argument: &str, usage: &'static str) -> Result<usize, ParseError> {
    argument
        .parse::<usize>()
        .ok()
        .filter(|position| *position > 0)
        .ok_or(ParseError::Usage(usage))
}

pub const HELP: &[(&str, &str)] = &[
    ("/login", "Sign in"),
    ("/logout", "Sign out"),
    ("/new", "Start a new chat"),
    ("/chats", "List chats"),
    ("/select <n>", "Switch to chat n"),
    ("/clear", "Delete all chat history"),
    ("/image <path>", "Attach an image to the next message"),
    ("/camera", "Attach a camera photo to the next message"),
    ("/dictate", "Dictate the next message"),
    ("/copy <n>", "Copy message n to the clipboard"),
    ("/notify", "Enable reply notifications"),
    ("/away", "Toggle away; replies notify while away"),
    ("/model [id]", "Show or switch the model"),
    ("/help", "Show this help"),
    ("/quit", "Exit"),
];
