use chrono::{DateTime, TimeZone, Utc};

use crate::protocol::START_MESSAGE_ID;

/// Identifiers of one call attempt, from transport open to disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Opaque client-side identifier
    pub session_id: String,
    /// Call identifier announced in the start frame
    pub call_id: String,
    /// Stream identifier carried by every frame of this session
    pub stream_id: String,
    /// When the session started
    pub started_at: DateTime<Utc>,
    next_message_id: u64,
}

impl Session {
    /// New session; `now_ms` is the controller clock in unix milliseconds
    pub fn new(now_ms: i64) -> Self {
        let session_id = format!("session-{}", uuid::Uuid::new_v4());

        Self {
            call_id: session_id.clone(),
            session_id,
            stream_id: format!("stream_{}", now_ms),
            started_at: Utc.timestamp_millis_opt(now_ms).single().unwrap_or_else(Utc::now),
            next_message_id: START_MESSAGE_ID + 1,
        }
    }

    /// Hand out the next audio message id; ids are never reused
    pub fn take_message_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    pub fn next_message_id(&self) -> u64 {
        self.next_message_id
    }
}
