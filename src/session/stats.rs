use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::ConnectionState;

/// Snapshot published after every controller step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub stream_id: Option<String>,
    /// Id the next outbound audio frame will carry
    pub next_message_id: Option<u64>,
    /// Audio frames sent in the current session
    pub frames_sent: u64,
    pub capturing: bool,
    pub playing: bool,
    pub processing: bool,
    pub recorded_chunks: usize,
    pub last_error: Option<String>,
}

impl Default for StreamStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            session_id: None,
            stream_id: None,
            next_message_id: None,
            frames_sent: 0,
            capturing: false,
            playing: false,
            processing: false,
            recorded_chunks: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkPlayback {
    Paused,
    Playing,
}

/// A sent chunk kept for local inspection and replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedChunk {
    pub id: u64,
    pub captured_at: DateTime<Utc>,
    pub message_id: u64,
    pub duration_ms: u64,
    /// Container bytes as captured
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub raw_len: usize,
    /// Length of the base64 payload on the wire
    pub payload_len: usize,
    pub passthrough: bool,
    pub playback: ChunkPlayback,
}

/// Client-local history of sent chunks; cleared by the user or at session end
#[derive(Debug, Default)]
pub struct ChunkHistory {
    chunks: Vec<RecordedChunk>,
    next_id: u64,
}

impl ChunkHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a chunk and return its id
    pub fn record(
        &mut self,
        captured_at: DateTime<Utc>,
        message_id: u64,
        duration_ms: u64,
        raw: Vec<u8>,
        payload_len: usize,
        passthrough: bool,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;

        self.chunks.push(RecordedChunk {
            id,
            captured_at,
            message_id,
            duration_ms,
            raw_len: raw.len(),
            raw,
            payload_len,
            passthrough,
            playback: ChunkPlayback::Paused,
        });

        id
    }

    pub fn get(&self, id: u64) -> Option<&RecordedChunk> {
        self.chunks.iter().find(|c| c.id == id)
    }

    pub fn set_playback(&mut self, id: u64, playback: ChunkPlayback) -> bool {
        match self.chunks.iter_mut().find(|c| c.id == id) {
            Some(chunk) => {
                chunk.playback = playback;
                true
            }
            None => false,
        }
    }

    pub fn list(&self) -> Vec<RecordedChunk> {
        self.chunks.clone()
    }

    /// Remove everything, returning how many chunks were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.chunks.len();
        self.chunks.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_records_and_clears() {
        let mut history = ChunkHistory::new();
        let first = history.record(Utc::now(), 2, 1000, vec![1, 2, 3], 4, false);
        let second = history.record(Utc::now(), 3, 400, vec![4], 4, true);

        assert_eq!((first, second), (1, 2));
        assert_eq!(history.len(), 2);
        assert_eq!(history.get(second).unwrap().message_id, 3);
        assert!(history.get(second).unwrap().passthrough);

        assert!(history.set_playback(first, ChunkPlayback::Playing));
        assert_eq!(history.get(first).unwrap().playback, ChunkPlayback::Playing);
        assert!(!history.set_playback(99, ChunkPlayback::Playing));

        assert_eq!(history.clear(), 2);
        assert!(history.is_empty());

        // Ids keep increasing after a clear
        let third = history.record(Utc::now(), 4, 1000, vec![], 0, false);
        assert_eq!(third, 3);
    }

    #[test]
    fn test_recorded_chunk_serializes_without_bytes() {
        let mut history = ChunkHistory::new();
        history.record(Utc::now(), 2, 1000, vec![0; 64], 88, false);

        let json = serde_json::to_value(history.list()).unwrap();
        assert_eq!(json[0]["raw_len"], 64);
        assert_eq!(json[0]["payload_len"], 88);
        assert_eq!(json[0]["playback"], "paused");
        assert!(json[0].get("raw").is_none());
    }
}
