// ABOUTME: Conversions between plain text and Slack's escaped, reference-annotated wire text
// ABOUTME: Pure functions; name resolution is supplied through the NameLookup trait

use crate::directory::NameLookup;
use crate::error::{BotError, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// A recognized `<...>` control sequence: a `#`, `@` or `!` reference, or a link whose
/// target (before any `|` label) contains a scheme separator
static SPECIAL_SEQUENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([#@!][^<>]*|[^<>|:]+:[^<>]*)>").expect("valid special sequence regex")
});

/// Escape plain text for sending. `&` goes first so entities are not double-escaped.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Convert text as the server delivered it into text that can be sent back verbatim.
///
/// Channel, user and broadcast references lose their labels (`<#C1|general>` becomes
/// `<#C1>`) and link annotations collapse to the bare target (`<http://x|x>` becomes
/// `http://x`) so the platform re-linkifies them.
pub fn to_sendable(server_text: &str) -> String {
    SPECIAL_SEQUENCE
        .replace_all(server_text, |caps: &Captures| {
            let body = caps[1].split('|').next().unwrap_or_default();
            match body.chars().next() {
                Some('#') | Some('@') | Some('!') => format!("<{}>", body),
                _ => body.to_string(),
            }
        })
        .into_owned()
}

/// Convert wire text into plain text.
///
/// Channel and user references become `#name` / `@name` (dropped when the ID does not
/// resolve), `<!channel>`, `<!group>` and `<!everyone>` become `@channel`, `@group` and
/// `@everyone`, links become their target, and entity escapes are reversed.
///
/// Fails with [`BotError::Format`] when `<` or `>` appear outside a recognized sequence.
pub fn to_plain(wire_text: &str, names: &impl NameLookup) -> Result<String> {
    let stripped = SPECIAL_SEQUENCE.replace_all(wire_text, "");
    if stripped.contains('<') || stripped.contains('>') {
        return Err(BotError::Format(format!(
            "unescaped angle bracket in \"{}\"",
            wire_text
        )));
    }

    let mut plain = String::with_capacity(wire_text.len());
    let mut last = 0;
    for caps in SPECIAL_SEQUENCE.captures_iter(wire_text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        plain.push_str(&unescape(&wire_text[last..whole.start()]));
        plain.push_str(&render_sequence(&caps[1], names));
        last = whole.end();
    }
    plain.push_str(&unescape(&wire_text[last..]));

    Ok(plain)
}

fn render_sequence(sequence: &str, names: &impl NameLookup) -> String {
    let mut parts = sequence.splitn(2, '|');
    let body = parts.next().unwrap_or_default();
    let label = parts.next();

    if let Some(channel_id) = body.strip_prefix('#') {
        return names
            .channel_name(channel_id)
            .map(|name| format!("#{}", name))
            .unwrap_or_default();
    }
    if let Some(user_id) = body.strip_prefix('@') {
        return names
            .user_name(user_id)
            .map(|name| format!("@{}", name))
            .unwrap_or_default();
    }
    if let Some(keyword) = body.strip_prefix('!') {
        return match keyword {
            "channel" | "group" | "everyone" => format!("@{}", keyword),
            _ => label.map(unescape).unwrap_or_default(),
        };
    }

    unescape(body)
}
