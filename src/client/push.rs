use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Deserialize;
use serde_json::Value;

use crate::client::reply::ReplyRegistry;
use crate::error::SyncResult;
use crate::files::FileStatusUpdate;

pub const FILE_STATUS: &str = "FILE_STATUS";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    FileStatus(FileStatusUpdate),
    Reply { code: String, data: Value },
    Other { kind: Option<String> },
}

impl PushMessage {
    pub fn decode(text: &str) -> SyncResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let kind = envelope.kind.and_then(|kind| match kind {
            Value::String(kind) => Some(kind),
            Value::Null => None,
            other => Some(other.to_string()),
        });
        if kind.as_deref() == Some(FILE_STATUS) {
            let update: FileStatusUpdate = serde_json::from_value(envelope.data)?;
            return Ok(PushMessage::FileStatus(update));
        }
        if let Some(code) = envelope.code.filter(|code| !code.is_empty()) {
            return Ok(PushMessage::Reply {
                code,
                data: envelope.data,
            });
        }
        Ok(PushMessage::Other { kind })
    }
}

/// Write half handed to the push connection.
///
/// Replies are resolved immediately so a caller awaiting one is woken even
/// while the list owner is busy; status updates are queued for the list in
/// arrival order.
#[derive(Debug, Clone)]
pub struct PushSender {
    tx: Sender<FileStatusUpdate>,
    replies: ReplyRegistry,
}

impl PushSender {
    pub fn route(&self, message: PushMessage) -> bool {
        match message {
            PushMessage::FileStatus(update) => self.tx.send(update).is_ok(),
            PushMessage::Reply { code, data } => {
                self.replies.resolve(&code, data);
                true
            }
            PushMessage::Other { kind } => {
                tracing::trace!(?kind, "ignoring push message");
                false
            }
        }
    }

    pub fn route_text(&self, text: &str) -> bool {
        match PushMessage::decode(text) {
            Ok(message) => self.route(message),
            Err(err) => {
                tracing::warn!(%err, "dropping undecodable push frame");
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushInbox {
    tx: Sender<FileStatusUpdate>,
    rx: Receiver<FileStatusUpdate>,
    replies: ReplyRegistry,
}

impl PushInbox {
    pub fn new(replies: ReplyRegistry) -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx, replies }
    }

    pub fn sender(&self) -> PushSender {
        PushSender {
            tx: self.tx.clone(),
            replies: self.replies.clone(),
        }
    }

    pub fn replies(&self) -> &ReplyRegistry {
        &self.replies
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn drain(&self) -> Vec<FileStatusUpdate> {
        self.rx.try_iter().collect()
    }
}
