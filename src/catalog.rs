use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A platform that can be blocked during a focus session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    Youtube,
    Tiktok,
    Facebook,
    Twitter,
    Snapchat,
}

impl Platform {
    /// Every known platform, in catalog order
    pub const ALL: [Platform; 6] = [
        Platform::Instagram,
        Platform::Youtube,
        Platform::Tiktok,
        Platform::Facebook,
        Platform::Twitter,
        Platform::Snapchat,
    ];

    /// Stable string key
    pub fn id(self) -> &'static str {
        match self {
            Platform::Instagram => "instagram",
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Facebook => "facebook",
            Platform::Twitter => "twitter",
            Platform::Snapchat => "snapchat",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Platform::Instagram => "Instagram Reels",
            Platform::Youtube => "YouTube Shorts",
            Platform::Tiktok => "TikTok",
            Platform::Facebook => "Facebook Watch",
            Platform::Twitter => "Twitter/X",
            Platform::Snapchat => "Snapchat",
        }
    }

    /// Opaque identifier understood by the enforcement backend
    pub fn enforcement_id(self) -> &'static str {
        match self {
            Platform::Instagram => "com.instagram.android",
            Platform::Youtube => "com.google.android.youtube",
            Platform::Tiktok => "com.zhiliaoapp.musically",
            Platform::Facebook => "com.facebook.katana",
            Platform::Twitter => "com.twitter.android",
            Platform::Snapchat => "com.snapchat.android",
        }
    }

    /// Reverse lookup for identifiers reported back by the enforcement backend
    pub fn from_enforcement_id(enforcement_id: &str) -> Option<Platform> {
        Self::ALL
            .into_iter()
            .find(|p| p.enforcement_id() == enforcement_id)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform '{id}' (expected one of: {})", valid_ids())]
pub struct UnknownPlatform {
    pub id: String,
}

fn valid_ids() -> String {
    Platform::ALL
        .iter()
        .map(|p| p.id())
        .collect::<Vec<_>>()
        .join(", ")
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownPlatform { id: s.to_string() })
    }
}

/// The set of platforms chosen for the next (or current) session
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Selection {
    platforms: BTreeSet<Platform>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the platform was not already selected
    pub fn insert(&mut self, platform: Platform) -> bool {
        self.platforms.insert(platform)
    }

    pub fn remove(&mut self, platform: Platform) -> bool {
        self.platforms.remove(&platform)
    }

    /// Flip a platform in or out; returns whether it is selected afterwards
    pub fn toggle(&mut self, platform: Platform) -> bool {
        if self.platforms.remove(&platform) {
            false
        } else {
            self.platforms.insert(platform);
            true
        }
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.platforms.contains(&platform)
    }

    pub fn select_all(&mut self) {
        self.platforms.extend(Platform::ALL);
    }

    pub fn is_all(&self) -> bool {
        Platform::ALL.iter().all(|p| self.platforms.contains(p))
    }

    pub fn clear(&mut self) {
        self.platforms.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Platform> + '_ {
        self.platforms.iter().copied()
    }

    pub fn enforcement_ids(&self) -> Vec<String> {
        self.iter().map(|p| p.enforcement_id().to_string()).collect()
    }
}

impl FromIterator<Platform> for Selection {
    fn from_iter<I: IntoIterator<Item = Platform>>(iter: I) -> Self {
        Self {
            platforms: iter.into_iter().collect(),
        }
    }
}
