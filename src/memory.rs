//! Conversation memory: TTL-keyed, bounded-history session cache.
//!
//! One session per user id. Sessions move `ABSENT → ACTIVE → ABSENT`; an
//! expired session is replaced in place on the next message, its history
//! discarded — expiry is treated as "no session", never as an error.
//!
//! A single background reaper task per store instance sweeps expired
//! sessions on a configurable interval. The reaper owns an `Arc` of the
//! shared state and takes the same session-map lock as the foreground
//! operations, so a sweep pass blocks unrelated calls for at most the
//! duration of one scan.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ConversationConfig;
use crate::models::{ChatMessage, MemoryStats, Role};

/// Rough token estimate used for the context budget; exact tokenization is
/// deliberately out of scope.
const CHARS_PER_TOKEN: usize = 4;

const ACTIVE_WINDOW_SECS: i64 = 300;

struct Session {
    messages: VecDeque<ChatMessage>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
    last_active: DateTime<Utc>,
}

struct Inner {
    cfg: ConversationConfig,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Inner {
    fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cfg.timeout_minutes as i64 * 60)
    }

    fn is_expired(&self, session: &Session, now: DateTime<Utc>) -> bool {
        now - session.last_active > self.timeout()
    }

    fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::info!(evicted, remaining = sessions.len(), "swept expired sessions");
        }
        evicted
    }
}

pub struct ConversationStore {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationStore {
    /// Create the store and spawn its reaper task. Must be called from
    /// within a tokio runtime.
    pub fn new(cfg: ConversationConfig) -> Self {
        let sweep_interval = Duration::from_secs(cfg.sweep_interval_secs.max(1));
        let inner = Arc::new(Inner {
            cfg,
            sessions: Mutex::new(HashMap::new()),
        });

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let reaper_state = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; consume it so the first
            // sweep happens one full interval after startup.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        reaper_state.sweep_expired();
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::debug!("conversation reaper stopping");
                        break;
                    }
                }
            }
        });

        Self {
            inner,
            shutdown_tx,
            reaper: Mutex::new(Some(handle)),
        }
    }

    /// Append a message to the user's session, creating a fresh session if
    /// none exists or the existing one has expired (the old history is
    /// discarded). The history bound evicts the oldest message.
    pub fn add_message(&self, user_id: &str, role: Role, content: &str) {
        let now = Utc::now();
        let mut sessions = self.inner.sessions.lock().unwrap();

        let stale = sessions
            .get(user_id)
            .is_some_and(|s| self.inner.is_expired(s, now));
        if stale {
            sessions.remove(user_id);
            tracing::debug!(user_id, "expired session replaced");
        }

        let session = sessions.entry(user_id.to_string()).or_insert_with(|| Session {
            messages: VecDeque::new(),
            created_at: now,
            last_active: now,
        });

        session.messages.push_back(ChatMessage {
            role,
            content: content.to_string(),
            timestamp: now,
        });
        while session.messages.len() > self.inner.cfg.max_history {
            session.messages.pop_front();
        }
        session.last_active = now;
    }

    /// Build a speaker-labeled transcript within the token budget.
    ///
    /// Messages are selected newest-first until the budget would be
    /// exceeded, then returned in chronological order. No live session
    /// yields an empty string.
    pub fn get_context(&self, user_id: &str, max_tokens: usize) -> String {
        let now = Utc::now();
        let sessions = self.inner.sessions.lock().unwrap();
        let Some(session) = sessions.get(user_id) else {
            return String::new();
        };
        if self.inner.is_expired(session, now) {
            return String::new();
        }

        let mut lines: VecDeque<String> = VecDeque::new();
        let mut spent = 0usize;
        for message in session.messages.iter().rev() {
            let cost = message.content.chars().count().div_ceil(CHARS_PER_TOKEN);
            if spent + cost > max_tokens {
                break;
            }
            lines.push_front(format!("{}: {}", message.role.label(), message.content));
            spent += cost;
        }

        Vec::from(lines).join("\n")
    }

    /// Transcript bounded by the configured default budget.
    pub fn get_default_context(&self, user_id: &str) -> String {
        self.get_context(user_id, self.inner.cfg.max_context_tokens)
    }

    /// Remove the user's session. Returns whether anything was removed.
    pub fn clear(&self, user_id: &str) -> bool {
        self.inner.sessions.lock().unwrap().remove(user_id).is_some()
    }

    /// Evict every expired session immediately. The reaper calls this on
    /// its interval; it is also callable directly.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep_expired()
    }

    pub fn stats(&self) -> MemoryStats {
        let now = Utc::now();
        let sessions = self.inner.sessions.lock().unwrap();

        let total_sessions = sessions.len();
        let total_messages: usize = sessions.values().map(|s| s.messages.len()).sum();
        let active_sessions = sessions
            .values()
            .filter(|s| (now - s.last_active).num_seconds() <= ACTIVE_WINDOW_SECS)
            .count();
        let estimated_memory_bytes: usize = sessions
            .iter()
            .map(|(user_id, s)| {
                user_id.len()
                    + s.messages
                        .iter()
                        .map(|m| m.content.len() + std::mem::size_of::<ChatMessage>())
                        .sum::<usize>()
                    + std::mem::size_of::<Session>()
            })
            .sum();

        MemoryStats {
            total_sessions,
            active_sessions,
            total_messages,
            avg_messages_per_session: total_messages as f64 / total_sessions.max(1) as f64,
            estimated_memory_bytes,
        }
    }

    /// Stop the reaper and wait (bounded) for it to exit. The store remains
    /// usable afterwards; it just loses background expiry.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.reaper.lock().unwrap().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .is_err()
            {
                tracing::warn!("conversation reaper did not stop within 5s");
            }
        }
    }

    #[cfg(test)]
    fn backdate(&self, user_id: &str, secs: i64) {
        let mut sessions = self.inner.sessions.lock().unwrap();
        if let Some(s) = sessions.get_mut(user_id) {
            s.last_active -= chrono::Duration::seconds(secs);
        }
    }
}
