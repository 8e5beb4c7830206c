//! Topic patterns and the hierarchical naming convention.
//!
//! Topics are `/`-delimited. A pattern segment of `+` matches exactly one
//! topic segment; every other segment must match literally. Patterns and
//! topics must have the same number of segments, so `a/+` never matches
//! `a/b/c`. A leading `/` produces an empty first segment on both sides and
//! needs no special handling.

use std::fmt;

/// Single-segment wildcard.
pub const WILDCARD: &str = "+";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Exact(String),
    Any,
}

/// A parsed subscription/dispatch pattern such as `/live/event/+`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicPattern {
    /// Parse a pattern string.
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .map(|s| {
                if s == WILDCARD {
                    Segment::Any
                } else {
                    Segment::Exact(s.to_owned())
                }
            })
            .collect();
        Self {
            raw: pattern.to_owned(),
            segments,
        }
    }

    /// The pattern as written, in broker-native syntax.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains any wildcard segment.
    pub fn is_exact(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Exact(_)))
    }

    /// Test a concrete topic against the pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let mut parts = topic.split('/');
        for segment in &self.segments {
            let Some(part) = parts.next() else {
                return false;
            };
            if let Segment::Exact(expected) = segment {
                if expected != part {
                    return false;
                }
            }
        }
        parts.next().is_none()
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for TopicPattern {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Builds topic names under one domain prefix.
///
/// - request: `<domain>/req/<name>`
/// - reply: `<domain>/resp/<name>`
/// - event: `<domain>/event/<kind>`
/// - status: `<domain>/status/<started|stopped>` and `<domain>/query/status`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topics {
    domain: String,
}

impl Topics {
    /// Topics rooted at `domain` (e.g. `/live`). A trailing `/` is dropped.
    pub fn new(domain: impl Into<String>) -> Self {
        let mut domain = domain.into();
        while domain.len() > 1 && domain.ends_with('/') {
            let _ = domain.pop();
        }
        Self { domain }
    }

    /// The domain prefix.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Request topic for an RPC namespace.
    pub fn request(&self, name: &str) -> String {
        format!("{}/req/{name}", self.domain)
    }

    /// Reply topic for an RPC namespace.
    pub fn reply(&self, name: &str) -> String {
        format!("{}/resp/{name}", self.domain)
    }

    /// Spontaneous event topic.
    pub fn event(&self, kind: &str) -> String {
        format!("{}/event/{kind}", self.domain)
    }

    /// Status announcement topic (`started` / `stopped`).
    pub fn status(&self, state: &str) -> String {
        format!("{}/status/{state}", self.domain)
    }

    /// Status query topic, published after every (re)connect.
    pub fn status_query(&self) -> String {
        format!("{}/query/status", self.domain)
    }

    /// Pattern matching every reply.
    pub fn any_reply(&self) -> TopicPattern {
        TopicPattern::parse(&self.reply(WILDCARD))
    }

    /// Pattern matching every spontaneous event.
    pub fn any_event(&self) -> TopicPattern {
        TopicPattern::parse(&self.event(WILDCARD))
    }

    /// Pattern matching every status announcement.
    pub fn any_status(&self) -> TopicPattern {
        TopicPattern::parse(&self.status(WILDCARD))
    }

    /// The full set re-subscribed on every successful (re)connect.
    pub fn subscriptions(&self) -> Vec<TopicPattern> {
        vec![self.any_status(), self.any_reply(), self.any_event()]
    }
}

impl Default for Topics {
    fn default() -> Self {
        Self::new("/live")
    }
}
