// ABOUTME: Channel and user directory lookups over the transport's current snapshot
// ABOUTME: Resolves names to IDs and back, including inline <#ID|label> and <@ID|label> references

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static CHANNEL_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<#(\w+)(?:\|[^>]+)?>$").expect("valid channel reference regex"));

static USER_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<@(\w+)(?:\|[^>]+)?>$").expect("valid user reference regex"));

/// A channel or user known to the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
    /// Secondary display name (a user's real name); unused for channels
    pub secondary_name: Option<String>,
}

impl DirectoryEntry {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            secondary_name: None,
        }
    }

    pub fn with_secondary_name(mut self, secondary: impl Into<String>) -> Self {
        self.secondary_name = Some(secondary.into());
        self
    }
}

/// Resolve IDs to display names. Implemented by anything that can answer
/// directory questions, so the wire codec stays independent of the session.
pub trait NameLookup {
    fn channel_name(&self, channel_id: &str) -> Option<&str>;
    fn user_name(&self, user_id: &str) -> Option<&str>;
}

/// Point-in-time view of the workspace's channels and users.
///
/// "Channels" include public channels, private groups and direct-message channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub channels: Vec<DirectoryEntry>,
    pub users: Vec<DirectoryEntry>,
}

impl DirectorySnapshot {
    pub fn new(channels: Vec<DirectoryEntry>, users: Vec<DirectoryEntry>) -> Self {
        Self { channels, users }
    }

    /// Returns the ID of the channel called `name`, or `None` if there is no such channel.
    ///
    /// Accepts `general`, `#general`, and inline references (`<#C123>` or
    /// `<#C123|general>`); references resolve without consulting the snapshot.
    pub fn channel_id(&self, name: &str) -> Option<String> {
        let name = name.trim().trim_start_matches('#');
        if let Some(id) = parse_channel_reference(name) {
            return Some(id.to_string());
        }
        self.channels
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.id.clone())
    }

    /// Returns the ID of the user called `name`, matching references first, then
    /// usernames, then real names.
    pub fn user_id(&self, name: &str) -> Option<String> {
        let name = name.trim();
        if let Some(id) = parse_user_reference(name) {
            return Some(id.to_string());
        }
        self.users
            .iter()
            .find(|entry| entry.name == name)
            .or_else(|| {
                self.users
                    .iter()
                    .find(|entry| entry.secondary_name.as_deref() == Some(name))
            })
            .map(|entry| entry.id.clone())
    }

    pub fn has_channel(&self, channel_id: &str) -> bool {
        self.channels.iter().any(|entry| entry.id == channel_id)
    }

    pub fn user(&self, user_id: &str) -> Option<&DirectoryEntry> {
        self.users.iter().find(|entry| entry.id == user_id)
    }

    /// Insert or replace a channel entry (used when the stream reports a change)
    pub fn upsert_channel(&mut self, entry: DirectoryEntry) {
        upsert(&mut self.channels, entry);
    }

    pub fn upsert_user(&mut self, entry: DirectoryEntry) {
        upsert(&mut self.users, entry);
    }
}

impl NameLookup for DirectorySnapshot {
    fn channel_name(&self, channel_id: &str) -> Option<&str> {
        self.channels
            .iter()
            .find(|entry| entry.id == channel_id)
            .map(|entry| entry.name.as_str())
    }

    fn user_name(&self, user_id: &str) -> Option<&str> {
        self.user(user_id).map(|entry| entry.name.as_str())
    }
}

fn upsert(entries: &mut Vec<DirectoryEntry>, entry: DirectoryEntry) {
    match entries.iter_mut().find(|existing| existing.id == entry.id) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

/// Extract the channel ID from `<#ID>` or `<#ID|label>`
pub fn parse_channel_reference(text: &str) -> Option<&str> {
    CHANNEL_REFERENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Extract the user ID from `<@ID>` or `<@ID|label>`
pub fn parse_user_reference(text: &str) -> Option<&str> {
    USER_REFERENCE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
