//! Decides whether an event gets a reply.

use std::fmt;

use crate::event::{Event, EventKind, MentionToken};

/// Static reply policy, fixed at startup.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    pub mention_gating: bool,
    pub mention: MentionToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    Challenge,
    NotAMessageEvent,
    HasSubtype,
    FromBot,
    NoChannel,
    NotMentioned,
    EmptyMessage,
    Accepted,
}

impl FilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterReason::Challenge => "challenge",
            FilterReason::NotAMessageEvent => "not-a-message-event",
            FilterReason::HasSubtype => "has-subtype",
            FilterReason::FromBot => "from-bot",
            FilterReason::NoChannel => "no-channel",
            FilterReason::NotMentioned => "not-mentioned",
            FilterReason::EmptyMessage => "empty-message",
            FilterReason::Accepted => "accepted",
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterDecision {
    pub respond: bool,
    pub reason: FilterReason,
}

impl FilterDecision {
    fn ignore(reason: FilterReason) -> Self {
        Self {
            respond: false,
            reason,
        }
    }

    fn accept() -> Self {
        Self {
            respond: true,
            reason: FilterReason::Accepted,
        }
    }
}

/// First matching rule wins.
///
/// Subtype-tagged events (edits, joins, bot echoes) are never answered, and
/// neither is anything a bot posted: replying to those can loop on our own
/// output.
pub fn decide(event: &Event, policy: &FilterPolicy) -> FilterDecision {
    match event.kind {
        EventKind::UrlVerification => return FilterDecision::ignore(FilterReason::Challenge),
        EventKind::Message | EventKind::Mention => {}
        EventKind::Other => return FilterDecision::ignore(FilterReason::NotAMessageEvent),
    }
    if event.subtype.is_some() {
        return FilterDecision::ignore(FilterReason::HasSubtype);
    }
    if event.bot_id.is_some() {
        return FilterDecision::ignore(FilterReason::FromBot);
    }
    if event.channel_id.is_empty() {
        return FilterDecision::ignore(FilterReason::NoChannel);
    }
    if policy.mention_gating && !event.mentions_bot {
        return FilterDecision::ignore(FilterReason::NotMentioned);
    }
    if policy.mention.strip(&event.text).is_empty() {
        return FilterDecision::ignore(FilterReason::EmptyMessage);
    }
    FilterDecision::accept()
}

// ============================================================================
// Tests
// ============================================================================
