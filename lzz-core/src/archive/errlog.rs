//! Bounded diagnostic log carried inside every archive.
//!
//! The log survives the scan that filled it, so an archive returned from a
//! failed open is still self-describing. Capacity is fixed: 15 slots of up
//! to 127 bytes each, never overwritten once full.

pub const MAX_MESSAGES: usize = 15;
pub const MAX_MESSAGE_BYTES: usize = 127;

#[derive(Debug, Default)]
pub struct ErrorLog {
    messages: Vec<String>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message, truncated to [`MAX_MESSAGE_BYTES`]. Returns the slot
    /// index, or `None` once the log is full (existing entries are never
    /// overwritten).
    pub fn push(&mut self, msg: &str) -> Option<usize> {
        if self.messages.len() == MAX_MESSAGES {
            return None;
        }
        let mut end = msg.len().min(MAX_MESSAGE_BYTES);
        while !msg.is_char_boundary(end) {
            end -= 1;
        }
        self.messages.push(msg[..end].to_string());
        Some(self.messages.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<&str> {
        self.messages.get(i).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
