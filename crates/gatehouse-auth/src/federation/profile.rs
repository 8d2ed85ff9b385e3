//! Verified provider profiles and their field fallbacks.

use serde::{Deserialize, Serialize};

/// A single value entry in a profile list (`emails`, `photos`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileValue {
    /// The value.
    pub value: String,
}

impl ProfileValue {
    /// Creates a new entry.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// Identity data returned by a provider after a successful exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderProfile {
    /// The provider's stable subject id.
    pub id: String,

    /// Provider that produced the profile.
    pub provider: String,

    /// Human-readable name, if the account has one.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Account handle, if the provider has one.
    #[serde(default)]
    pub username: Option<String>,

    /// Email addresses, preferred first.
    #[serde(default)]
    pub emails: Vec<ProfileValue>,

    /// Avatar or photo URLs, preferred first.
    #[serde(default)]
    pub photos: Vec<ProfileValue>,
}

impl ProviderProfile {
    /// Creates a profile with only the required fields.
    #[must_use]
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Appends an email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.emails.push(ProfileValue::new(email));
        self
    }

    /// Appends a photo URL.
    #[must_use]
    pub fn with_photo(mut self, url: impl Into<String>) -> Self {
        self.photos.push(ProfileValue::new(url));
        self
    }
}

/// First email of the profile, or the empty string.
#[must_use]
pub fn best_effort_email(profile: &ProviderProfile) -> String {
    first_value(&profile.emails)
}

/// First photo URL of the profile, or the empty string.
#[must_use]
pub fn best_effort_avatar(profile: &ProviderProfile) -> String {
    first_value(&profile.photos)
}

/// Display name, falling back to the username, then the empty string.
#[must_use]
pub fn best_effort_display_name(profile: &ProviderProfile) -> String {
    profile
        .display_name
        .as_deref()
        .filter(|name| !name.trim().is_empty())
        .or(profile.username.as_deref())
        .unwrap_or_default()
        .to_string()
}

fn first_value(values: &[ProfileValue]) -> String {
    values
        .first()
        .map(|v| v.value.clone())
        .unwrap_or_default()
}
