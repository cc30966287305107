//! Conversation log and the on-disk history of past conversations.
//!
//! The history file is a JSON array of conversations, newest first, each an
//! array of `{id, content, isUser, timestamp}` messages. Only the most
//! recent conversations are kept. Writes are atomic (temp file, fsync,
//! rename). Persistence is best-effort: callers log failures and carry on.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::llm::HistoryMessage;

/// One message of a stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

/// Messages of the current conversation, in order.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<StoredMessage>,
    seq: u64,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[StoredMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) -> &StoredMessage {
        self.push(content.into(), true)
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) -> &StoredMessage {
        self.push(content.into(), false)
    }

    fn push(&mut self, content: String, is_user: bool) -> &StoredMessage {
        let timestamp = Utc::now();
        self.seq += 1;
        let id = format!("{}-{}", timestamp.timestamp_millis(), self.seq);
        self.messages.push(StoredMessage {
            id,
            content,
            is_user,
            timestamp,
        });
        let last = self.messages.len() - 1;
        &self.messages[last]
    }

    /// The last `max` messages as request history (0 = all of them).
    pub fn history(&self, max: usize) -> Vec<HistoryMessage> {
        let start = match max {
            0 => 0,
            max => self.messages.len().saturating_sub(max),
        };
        self.messages[start..]
            .iter()
            .map(|m| {
                if m.is_user {
                    HistoryMessage::user(m.content.clone())
                } else {
                    HistoryMessage::assistant(m.content.clone())
                }
            })
            .collect()
    }
}

/// JSON file holding the most recent conversations.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    max_conversations: usize,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, max_conversations: usize) -> Self {
        Self {
            path: path.into(),
            max_conversations,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All stored conversations, newest first. A missing file is empty.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::History`] if the file cannot be read or parsed.
    pub fn load(&self) -> Result<Vec<Vec<StoredMessage>>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ChatError::History(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| {
            ChatError::History(format!("failed to parse {}: {e}", self.path.display()))
        })
    }

    /// Insert or replace `conversation` at the front of the history.
    ///
    /// A conversation is identified by the id of its first message. An
    /// unreadable history file is replaced rather than blocking the save.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::History`] if the file cannot be written.
    pub fn save_conversation(&self, conversation: &[StoredMessage]) -> Result<()> {
        let Some(first) = conversation.first() else {
            return Ok(());
        };

        let mut all = self.load().unwrap_or_else(|e| {
            warn!("discarding unreadable history: {e}");
            Vec::new()
        });
        all.retain(|c| c.first().is_none_or(|m| m.id != first.id));
        all.insert(0, conversation.to_vec());
        all.truncate(self.max_conversations);

        self.write_atomic(&all)?;
        debug!(
            "saved conversation {} ({} messages, {} stored)",
            first.id,
            conversation.len(),
            all.len()
        );
        Ok(())
    }

    fn write_atomic(&self, all: &[Vec<StoredMessage>]) -> Result<()> {
        let json = serde_json::to_string_pretty(all)
            .map_err(|e| ChatError::History(format!("failed to serialize history: {e}")))?;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| {
            ChatError::History(format!("failed to create {}: {e}", dir.display()))
        })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "history.json".into());
        let tmp_path = dir.join(format!(".{file_name}.tmp"));
        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| {
            ChatError::History(format!("failed to write {}: {e}", tmp_path.display()))
        })?;

        if let Ok(file) = std::fs::File::open(&tmp_path) {
            let _ = file.sync_all();
        }

        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            ChatError::History(format!(
                "failed to rename temp file to {}: {e}",
                self.path.display()
            ))
        })
    }
}
