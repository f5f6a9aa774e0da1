//! Channel names, classification and wildcard matching
//!
//! Bayeux channels are `/`-separated paths. The `/meta/` prefix is reserved
//! for session control and `/service/` for request/response style traffic
//! that the server never broadcasts.
//!
//! Subscription matching follows the Bayeux wildcard rule:
//!
//! - `/a/b` matches only `/a/b`
//! - `/a/*` matches exactly one further segment (`/a/b`, not `/a/b/c`)
//! - `/a/**` matches one or more further segments (`/a/b`, `/a/b/c`)
//!
//! Wildcards are only valid as the final segment of a subscription and are
//! never valid in a publish target.

use thiserror::Error;

pub const META_HANDSHAKE: &str = "/meta/handshake";
pub const META_CONNECT: &str = "/meta/connect";
pub const META_SUBSCRIBE: &str = "/meta/subscribe";
pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";
pub const META_DISCONNECT: &str = "/meta/disconnect";

const META_PREFIX: &str = "/meta/";
const SERVICE_PREFIX: &str = "/service/";

/// Channel validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ChannelError {
    #[error("Channel name cannot be empty")]
    Empty,
    #[error("Channel '{0}' must start with '/'")]
    MissingLeadingSlash(String),
    #[error("Channel '{0}' contains an empty segment")]
    EmptySegment(String),
    #[error("Channel '{0}' contains a wildcard before its last segment")]
    MisplacedWildcard(String),
    #[error("Channel '{0}' contains invalid character: '{1}'")]
    InvalidChar(String, char),
    #[error("Wildcard channel '{0}' cannot be published to")]
    WildcardPublish(String),
    #[error("Meta channel '{0}' is reserved for the protocol")]
    ReservedMeta(String),
}

/// True for `/meta/...` channels
pub fn is_meta(channel: &str) -> bool {
    channel.starts_with(META_PREFIX)
}

/// True for `/service/...` channels
pub fn is_service(channel: &str) -> bool {
    channel.starts_with(SERVICE_PREFIX)
}

/// True when the last segment is `*` or `**`
pub fn is_wildcard(channel: &str) -> bool {
    matches!(channel.rsplit('/').next(), Some("*") | Some("**"))
}

fn is_valid_segment_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "-_!~()$@.+%,;:=*".contains(ch)
}

/// Validate the syntax of a channel name (wildcards allowed as the final segment)
pub fn validate_channel(channel: &str) -> Result<(), ChannelError> {
    if channel.is_empty() {
        return Err(ChannelError::Empty);
    }
    if !channel.starts_with('/') {
        return Err(ChannelError::MissingLeadingSlash(channel.to_string()));
    }

    let segments: Vec<&str> = channel[1..].split('/').collect();
    let last = segments.len() - 1;

    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(ChannelError::EmptySegment(channel.to_string()));
        }
        if let Some(ch) = segment.chars().find(|c| !is_valid_segment_char(*c)) {
            return Err(ChannelError::InvalidChar(channel.to_string(), ch));
        }
        if segment.contains('*') {
            let is_final_wildcard = index == last && (*segment == "*" || *segment == "**");
            if !is_final_wildcard {
                return Err(ChannelError::MisplacedWildcard(channel.to_string()));
            }
        }
    }

    Ok(())
}

/// Validate a channel the application wants to subscribe to
pub fn validate_subscription(channel: &str) -> Result<(), ChannelError> {
    validate_channel(channel)?;
    if is_meta(channel) {
        return Err(ChannelError::ReservedMeta(channel.to_string()));
    }
    Ok(())
}

/// Validate a channel the application wants to publish to
pub fn validate_publish(channel: &str) -> Result<(), ChannelError> {
    validate_subscription(channel)?;
    if is_wildcard(channel) {
        return Err(ChannelError::WildcardPublish(channel.to_string()));
    }
    Ok(())
}

/// Does a subscription `pattern` cover a concrete `channel`?
pub fn channel_matches(pattern: &str, channel: &str) -> bool {
    if pattern == channel {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix("/**") {
        return channel
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| !rest.is_empty());
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return channel
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
    }

    false
}
