//! Chat commands: `.play` and its aliases, `.pair` help.
//!
//! The dispatcher reads inbound messages one at a time, in arrival order.
//! Unrecognized text gets no reply.


use crate::playback::{render_status, NewJob, PlaybackScheduler};
use crate::session::SessionStatus;
use melodia_core::{
    config::CommandConfig,
    error::BotError,
    message::{phone_part, InboundMessage, MessageHandle},
    records::{NewSongRequest, RequestStatus},
    traits::{Ledger, Transport},
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Reply to the pair alias. Pairing itself is only reachable through the admin API.
pub const PAIR_HELP: &str = "🔗 To link this bot to a phone, open the admin dashboard and \
request a pairing code for your number. Then enter the code on your phone under \
Linked devices → Link with phone number.";

/// Group label recorded when the transport did not provide one.
const UNKNOWN_GROUP: &str = "Unknown";

/// Known chat commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pair,
}

/// A recognized command with its argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: Command,
    /// The alias as the user typed it.
    pub alias: String,
    /// Remaining tokens joined with single spaces; may be empty.
    pub argument: String,
}

/// Alias-table parser. The first whitespace-delimited token must equal an
/// alias exactly (or case-insensitively when configured).
#[derive(Debug, Clone)]
pub struct CommandParser {
    play: Vec<String>,
    pair: Vec<String>,
    case_sensitive: bool,
}

impl CommandParser {
    pub fn new(config: &CommandConfig) -> Self {
        let fold = |aliases: &[String]| -> Vec<String> {
            aliases
                .iter()
                .map(|a| {
                    if config.case_sensitive {
                        a.clone()
                    } else {
                        a.to_lowercase()
                    }
                })
                .collect()
        };
        Self {
            play: fold(&config.play_aliases),
            pair: fold(&config.pair_aliases),
            case_sensitive: config.case_sensitive,
        }
    }

    /// Returns `None` for text that is not a command.
    pub fn parse(&self, text: &str) -> Option<ParsedCommand> {
        let mut tokens = text.split_whitespace();
        let first = tokens.next()?;
        let key = if self.case_sensitive {
            first.to_string()
        } else {
            first.to_lowercase()
        };
        let command = if self.play.contains(&key) {
            Command::Play
        } else if self.pair.contains(&key) {
            Command::Pair
        } else {
            return None;
        };
        Some(ParsedCommand {
            command,
            alias: first.to_string(),
            argument: tokens.collect::<Vec<_>>().join(" "),
        })
    }
}

pub fn usage_reply(alias: &str) -> String {
    format!("⚠️ Please provide a song name. Example: {alias} Hello")
}

pub fn searching_reply(query: &str) -> String {
    format!("🔎 Searching for: *{query}*...")
}

/// What the dispatcher did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Own message or not a command.
    Ignored,
    /// `.play` without a song name.
    Usage,
    /// A playback job was started.
    Playing { job_id: u64, request_id: Option<i64> },
    PairHelp,
}

/// Routes inbound chat messages to command handlers.
pub struct Dispatcher {
    parser: CommandParser,
    transport: Arc<dyn Transport>,
    ledger: Arc<dyn Ledger>,
    playback: Arc<PlaybackScheduler>,
    session: watch::Receiver<SessionStatus>,
}

impl Dispatcher {
    pub fn new(
        config: &CommandConfig,
        transport: Arc<dyn Transport>,
        ledger: Arc<dyn Ledger>,
        playback: Arc<PlaybackScheduler>,
        session: watch::Receiver<SessionStatus>,
    ) -> Self {
        Self {
            parser: CommandParser::new(config),
            transport,
            ledger,
            playback,
            session,
        }
    }

    /// Handle messages until the inbound channel closes.
    pub async fn run(self, mut inbound: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = inbound.recv().await {
            match self.handle(&message).await {
                Ok(DispatchOutcome::Playing { job_id, request_id }) => {
                    debug!("dispatch: job {job_id} started (request {request_id:?})");
                }
                Ok(outcome) => debug!("dispatch: {} -> {outcome:?}", message.id),
                Err(e) => warn!(
                    "dispatch: failed to handle message in {}: {e}",
                    message.conversation_id
                ),
            }
        }
        debug!("dispatch: inbound channel closed");
    }

    fn is_own_message(&self, message: &InboundMessage) -> bool {
        if message.from_self {
            return true;
        }
        let session = self.session.borrow();
        session
            .identity
            .as_deref()
            .is_some_and(|identity| phone_part(&message.sender_id) == identity)
    }

    pub async fn handle(&self, message: &InboundMessage) -> Result<DispatchOutcome, BotError> {
        if self.is_own_message(message) {
            return Ok(DispatchOutcome::Ignored);
        }
        let Some(parsed) = self.parser.parse(&message.text) else {
            return Ok(DispatchOutcome::Ignored);
        };
        match parsed.command {
            Command::Play if parsed.argument.is_empty() => {
                self.transport
                    .send_message(&message.conversation_id, &usage_reply(&parsed.alias))
                    .await?;
                Ok(DispatchOutcome::Usage)
            }
            Command::Play => self.play(message, parsed.argument).await,
            Command::Pair => {
                self.transport
                    .send_message(&message.conversation_id, PAIR_HELP)
                    .await?;
                Ok(DispatchOutcome::PairHelp)
            }
        }
    }

    async fn play(
        &self,
        message: &InboundMessage,
        query: String,
    ) -> Result<DispatchOutcome, BotError> {
        let conversation = &message.conversation_id;
        info!("dispatch: play '{query}' in {conversation}");
        if self.playback.is_active(conversation) {
            info!("dispatch: replacing the current job in {conversation}");
        }

        let group_name = match (&message.group_name, message.is_group) {
            (Some(name), _) => Some(name.clone()),
            (None, true) => Some(UNKNOWN_GROUP.to_string()),
            (None, false) => None,
        };
        let request = NewSongRequest {
            phone_number: message.phone_number().to_string(),
            query: query.clone(),
            status: RequestStatus::Playing,
            is_group: message.is_group,
            group_name,
        };
        let request_id = match self.ledger.create_song_request(request).await {
            Ok(record) => Some(record.id),
            Err(e) => {
                warn!("dispatch: failed to record request '{query}': {e}");
                None
            }
        };

        let target = match self.send_play_messages(conversation, &query).await {
            Ok(target) => target,
            Err(e) => {
                if let Some(id) = request_id {
                    if let Err(e) = self
                        .ledger
                        .update_song_request_status(id, RequestStatus::Failed)
                        .await
                    {
                        warn!("dispatch: failed to mark request {id} failed: {e}");
                    }
                }
                return Err(e);
            }
        };

        let job_id = self.playback.start(NewJob {
            conversation_id: conversation.clone(),
            query,
            target,
            request_id,
        });
        Ok(DispatchOutcome::Playing { job_id, request_id })
    }

    /// Acknowledgement, then the status message the job will edit.
    async fn send_play_messages(
        &self,
        conversation: &str,
        query: &str,
    ) -> Result<MessageHandle, BotError> {
        self.transport
            .send_message(conversation, &searching_reply(query))
            .await?;
        let status = render_status(query, 0, self.playback.duration_secs());
        self.transport.send_message(conversation, &status).await
    }
}
