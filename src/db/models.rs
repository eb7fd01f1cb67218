/// Database row types for all tables.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// User record in the users table
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub password_hash: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Delivery lifecycle of a direct message. Forward-only:
/// Sent -> Delivered -> Read. Group messages stay at Sent
/// (no per-recipient receipt tracking in this design).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}

/// Message record in the messages table.
/// Direct messages carry receiver_id; group messages carry group_id.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: Option<String>,
    pub group_id: Option<String>,
    pub is_group: bool,
    pub content: String,
    pub status: String,
    pub delivered_at: Option<String>,
    pub read_at: Option<String>,
    pub expires_at: Option<String>,
    pub scheduled_at: Option<String>,
    pub is_scheduled: bool,
    pub edited: bool,
    pub pinned: bool,
    pub created_at: String,
}

/// Emoji reaction on a message
#[derive(Debug, Clone)]
pub struct Reaction {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

/// Group chat record
#[derive(Debug, Clone)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: String,
}

/// Group membership record
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub group_id: String,
    pub user_id: String,
    pub joined_at: String,
}
