/// Value carried by a frame that delimits an epoch instead of updating a count
pub const MARKER_VALUE: i64 = -1;

/// Key written into marker frames; receivers ignore it
pub const MARKER_KEY: &str = "MARKER";

/// Message sent from a mapper to a reducer on one long-lived channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// Add `value` to the reducer's count for `key`
    Update {
        key: String,
        value: i64,
        sender_id: String,
    },
    /// Everything `sender_id` sent before this frame belongs to the current epoch
    Marker { sender_id: String },
}

impl ChannelMessage {
    pub fn update(key: impl Into<String>, value: i64, sender_id: impl Into<String>) -> Self {
        ChannelMessage::Update {
            key: key.into(),
            value,
            sender_id: sender_id.into(),
        }
    }

    pub fn marker(sender_id: impl Into<String>) -> Self {
        ChannelMessage::Marker {
            sender_id: sender_id.into(),
        }
    }

    pub fn sender_id(&self) -> &str {
        match self {
            ChannelMessage::Update { sender_id, .. } => sender_id,
            ChannelMessage::Marker { sender_id } => sender_id,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, ChannelMessage::Marker { .. })
    }
}
