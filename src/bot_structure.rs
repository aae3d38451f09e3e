use crate::*;

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown account: {0}")]
    AccountNotFound(ChatId),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
    #[error("ledger io: {0}")]
    Io(#[from] std::io::Error),
    #[error("account snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct SenderProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Normalized inbound event, the only shape the engine consumes. The
/// transport adapter maps raw updates into this and never leaks its own
/// types past this point.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat_id: ChatId,
    pub sender: SenderProfile,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone)]
pub enum EventPayload {
    Command(Command),
    Text(String),
    CategoryCallback { token: String },
    BackCallback,
    MediaWithCaption {
        attachment_ref: String,
        caption: Option<String>,
    },
}

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Available commands")]
pub enum Command {
    #[command(description = "show this message")]
    Help,
    #[command(description = "start the bot")]
    Start,
    #[command(description = "spending summary by category")]
    Status,
    #[command(description = "remove all recorded payments")]
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyboardSpec {
    /// One-time reply keyboard, rows of plain labels.
    Reply(Vec<Vec<String>>),
    /// Inline keyboard, rows of (label, callback token).
    Inline(Vec<Vec<(String, String)>>),
}

/// What the engine asks the messaging collaborator to do. `track_prompt`
/// marks a sent message as the account's new interactive prompt so it can be
/// invalidated on the next transition.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundIntent {
    Send {
        chat_id: ChatId,
        text: String,
        keyboard: Option<KeyboardSpec>,
        track_prompt: bool,
    },
    Edit {
        chat_id: ChatId,
        message_id: i32,
        text: String,
        keyboard: Option<KeyboardSpec>,
    },
    Delete {
        chat_id: ChatId,
        message_id: i32,
    },
}
