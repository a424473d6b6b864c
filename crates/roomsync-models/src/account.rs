use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, ChatId};

fn default_true() -> bool {
    true
}

/// Per-account configuration record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub phone: AccountId,
    /// Room whose content this account mirrors into its sub-rooms.
    #[serde(default)]
    pub main_room: Option<ChatId>,
    #[serde(default)]
    pub sub_rooms: Vec<ChatId>,
    /// Rooms watched by the alert relay; empty means every room.
    #[serde(default)]
    pub alert_rooms: Vec<ChatId>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, alias = "is_monitored")]
    pub alert_monitor: bool,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl AccountConfig {
    pub fn new(phone: impl AsRef<str>) -> Self {
        Self {
            phone: AccountId::new(phone),
            main_room: None,
            sub_rooms: Vec::new(),
            alert_rooms: Vec::new(),
            is_admin: false,
            alert_monitor: false,
            active: true,
        }
    }

    pub fn with_rooms(mut self, main_room: ChatId, sub_rooms: Vec<ChatId>) -> Self {
        self.main_room = Some(main_room);
        self.sub_rooms = sub_rooms;
        self
    }
}
