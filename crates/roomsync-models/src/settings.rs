use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, ChatId};
use crate::permissions::PermissionProfile;

/// Sender load balancer ("room swap").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSwapSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Monitored source rooms.
    #[serde(default)]
    pub source_rooms: Vec<ChatId>,
    /// Sender display names that are never copied.
    #[serde(default)]
    pub exclude_senders: HashSet<String>,
    /// Accounts never chosen as copy targets.
    #[serde(default)]
    pub exclude_accounts: HashSet<AccountId>,
}

/// Name-filtered copy mode ("expert mode").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Accounts operating the mode; each copies into its own room tree.
    #[serde(default)]
    pub accounts: Vec<AccountId>,
    /// Monitored rooms; empty means every room the account sees.
    #[serde(default)]
    pub rooms: Vec<ChatId>,
    /// Allow-listed sender display names.
    #[serde(default)]
    pub names: HashSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Room receiving alert notifications.
    #[serde(default)]
    pub notify_room: Option<ChatId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminSettings {
    #[serde(default)]
    pub rooms: Vec<ChatId>,
    #[serde(default)]
    pub profile: PermissionProfile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSettings {
    /// Accounts that never take part in join/leave commands.
    #[serde(default)]
    pub exclude: HashSet<AccountId>,
}
