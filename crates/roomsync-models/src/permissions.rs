use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Member capabilities that can be granted or withheld room-wide.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        const SEND_MESSAGES      = 1 << 0;
        const SEND_PHOTOS        = 1 << 1;
        const SEND_VIDEOS        = 1 << 2;
        const SEND_ROUND_VIDEOS  = 1 << 3;
        const SEND_AUDIOS        = 1 << 4;
        const SEND_VOICES        = 1 << 5;
        const SEND_DOCS          = 1 << 6;
        const SEND_GIFS          = 1 << 7;
        const EMBED_LINKS        = 1 << 8;
        const SEND_POLLS         = 1 << 9;
        const INVITE_USERS       = 1 << 10;
        const PIN_MESSAGES       = 1 << 11;
        const CHANGE_INFO        = 1 << 12;
    }
}

/// Profile key for every capability, in the order they are presented.
pub const CAPABILITY_NAMES: &[(&str, Capabilities)] = &[
    ("send_message", Capabilities::SEND_MESSAGES),
    ("send_media_photo", Capabilities::SEND_PHOTOS),
    ("send_media_video_file", Capabilities::SEND_VIDEOS),
    ("send_media_video_message", Capabilities::SEND_ROUND_VIDEOS),
    ("send_media_music", Capabilities::SEND_AUDIOS),
    ("send_media_voice", Capabilities::SEND_VOICES),
    ("send_media_file", Capabilities::SEND_DOCS),
    ("send_media_sticker_gif", Capabilities::SEND_GIFS),
    ("send_media_link", Capabilities::EMBED_LINKS),
    ("send_media_poll", Capabilities::SEND_POLLS),
    ("add_participant", Capabilities::INVITE_USERS),
    ("pin_message", Capabilities::PIN_MESSAGES),
    ("change_group_info", Capabilities::CHANGE_INFO),
];

impl Capabilities {
    /// Capability for a profile key such as `"pin_message"`.
    pub fn from_profile_key(key: &str) -> Option<Self> {
        CAPABILITY_NAMES
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(_, c)| *c)
    }
}

/// Capability toggles keyed by name. Names missing from the map count as
/// enabled, so an empty profile allows everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionProfile {
    toggles: BTreeMap<String, bool>,
}

impl PermissionProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, enabled: bool) -> &mut Self {
        self.toggles.insert(name.into(), enabled);
        self
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.toggles.get(name).copied().unwrap_or(true)
    }

    /// Names in the profile that do not correspond to a known capability.
    pub fn unknown_names(&self) -> Vec<&str> {
        self.toggles
            .keys()
            .filter(|k| Capabilities::from_profile_key(k).is_none())
            .map(String::as_str)
            .collect()
    }

    pub fn allowed(&self) -> Capabilities {
        CAPABILITY_NAMES
            .iter()
            .filter(|(name, _)| self.is_enabled(name))
            .fold(Capabilities::empty(), |acc, (_, c)| acc | *c)
    }

    /// Capabilities to withhold from regular members.
    pub fn banned(&self) -> Capabilities {
        Capabilities::all() - self.allowed()
    }
}

/// Which of the two platform permission request shapes to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionShape {
    /// Default banned rights of a basic group.
    BasicGroup,
    /// Banned rights of a supergroup or broadcast channel.
    Broadcast,
}

/// One permission update request: the shape plus the withheld capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPermissions {
    pub shape: PermissionShape,
    pub banned: Capabilities,
}

impl GroupPermissions {
    pub fn new(shape: PermissionShape, profile: &PermissionProfile) -> Self {
        Self {
            shape,
            banned: profile.banned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_profile_allows_everything() {
        let profile = PermissionProfile::new();
        assert_eq!(profile.allowed(), Capabilities::all());
        assert!(profile.banned().is_empty());
    }

    #[test]
    fn disabled_toggles_become_banned() {
        let mut profile = PermissionProfile::new();
        profile.set("pin_message", false).set("send_message", true);
        assert_eq!(profile.banned(), Capabilities::PIN_MESSAGES);
        assert!(profile.allowed().contains(Capabilities::SEND_MESSAGES));
    }

    #[test]
    fn profile_keys_map_to_capabilities() {
        assert_eq!(
            Capabilities::from_profile_key("pin_message"),
            Some(Capabilities::PIN_MESSAGES)
        );
        assert_eq!(
            Capabilities::from_profile_key("send_media_sticker_gif"),
            Some(Capabilities::SEND_GIFS)
        );
        // Flag identifiers are not profile keys.
        assert_eq!(Capabilities::from_profile_key("PIN_MESSAGES"), None);
    }

    #[test]
    fn unknown_names_are_reported() {
        let mut profile = PermissionProfile::new();
        profile.set("send_rockets", false);
        assert_eq!(profile.unknown_names(), vec!["send_rockets"]);
        assert!(profile.banned().is_empty());
    }

    #[test]
    fn profile_loads_from_toml_table() {
        let profile: PermissionProfile =
            toml::from_str("send_media_poll = false\nchange_group_info = false\n").unwrap();
        assert_eq!(
            profile.banned(),
            Capabilities::SEND_POLLS | Capabilities::CHANGE_INFO
        );
    }
}
