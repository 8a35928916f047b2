// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel pattern matching: literal equality, or `*` compiled to `.*` (§4.C).
//! No `?`, no character classes.

use regex::Regex;

#[derive(Clone)]
enum Compiled {
    Literal(String),
    Wildcard(Regex),
}

/// A compiled channel-name pattern as used by [`crate::MessageBus::subscribe`].
#[derive(Clone)]
pub struct ChannelPattern {
    raw: String,
    compiled: Compiled,
}

impl ChannelPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let raw = pattern.into();
        let compiled = if raw.contains('*') {
            let mut regex_src = String::from("^");
            for part in raw.split('*') {
                regex_src.push_str(&regex::escape(part));
                regex_src.push_str(".*");
            }
            // trim the trailing ".*" added past the last literal segment
            regex_src.truncate(regex_src.len() - 2);
            regex_src.push('$');
            let re = Regex::new(&regex_src).expect("pattern built from escaped literals is valid");
            Compiled::Wildcard(re)
        } else {
            Compiled::Literal(raw.clone())
        };
        Self { raw, compiled }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.compiled, Compiled::Literal(_))
    }

    pub fn matches(&self, channel: &str) -> bool {
        match &self.compiled {
            Compiled::Literal(lit) => lit == channel,
            Compiled::Wildcard(re) => re.is_match(channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_only_exact_channel() {
        let p = ChannelPattern::new("ghost:commands");
        assert!(p.matches("ghost:commands"));
        assert!(!p.matches("ghost:commands:x"));
        assert!(p.is_literal());
    }

    #[test]
    fn wildcard_pattern_matches_prefix() {
        let p = ChannelPattern::new("ghost:metrics:*");
        assert!(p.matches("ghost:metrics:svc-1"));
        assert!(!p.matches("ghost:commands"));
        assert!(!p.is_literal());
    }

    #[test]
    fn wildcard_does_not_support_question_mark_as_special() {
        let p = ChannelPattern::new("ghost:ab?:1");
        assert!(p.matches("ghost:ab?:1"));
        assert!(!p.matches("ghost:abc:1"));
    }
}
