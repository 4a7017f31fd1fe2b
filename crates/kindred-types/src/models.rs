use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier that a `audio_prompt` like must carry.
pub const AUDIO_PROMPT_IDENTIFIER: &str = "audio_prompt";

/// Identifier that a content-free `profile` like must carry.
pub const PROFILE_IDENTIFIER: &str = "profile";

/// Consumable kind spent by a rose like.
pub const ROSE_CONSUMABLE: &str = "rose";

/// Subscription feature that lifts the daily like cap.
pub const UNLIMITED_LIKES_FEATURE: &str = "unlimited_likes";

/// The profile element a like is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Profile,
    Media,
    AudioPrompt,
    StoryTime,
    MyType,
    GettingPersonal,
    DateVibes,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        Self::Profile,
        Self::Media,
        Self::AudioPrompt,
        Self::StoryTime,
        Self::MyType,
        Self::GettingPersonal,
        Self::DateVibes,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Media => "media",
            Self::AudioPrompt => "audio_prompt",
            Self::StoryTime => "story_time",
            Self::MyType => "my_type",
            Self::GettingPersonal => "getting_personal",
            Self::DateVibes => "date_vibes",
        }
    }

    /// True for the four written-prompt categories.
    pub fn is_prompt_category(self) -> bool {
        matches!(
            self,
            Self::StoryTime | Self::MyType | Self::GettingPersonal | Self::DateVibes
        )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown content type: {0}")]
pub struct UnknownContentType(pub String);

impl FromStr for ContentType {
    type Err = UnknownContentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownContentType(s.to_string()))
    }
}

/// How a like was sent. Roses cost one consumable and skip the daily cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    #[default]
    Standard,
    Rose,
}

impl InteractionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Rose => "rose",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    RecipientOffline,
}

impl DeliveryStatus {
    pub fn from_delivered(delivered: bool) -> Self {
        if delivered { Self::Delivered } else { Self::RecipientOffline }
    }
}

/// Minimal profile view used when telling someone about another user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub user_id: i64,
    pub name: String,
    pub first_photo_url: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}
