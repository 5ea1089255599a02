// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic name / topic filter validation and the MQTT-3.1.1 matching table.

use crate::error::DecodeError;

/// A publish topic: `/`-separated levels, no wildcards, non-empty.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TopicName(String);

impl TopicName {
    /// # Errors
    ///
    /// Returns an error if `s` is empty or contains `+`/`#`.
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        if s.is_empty() || s.contains('+') || s.contains('#') {
            return Err(DecodeError::InvalidTopic);
        }
        Ok(Self(s.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.0.starts_with('$')
    }
}

impl std::fmt::Display for TopicName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscription filter: `/`-separated levels, `+` matches exactly one
/// level, `#` matches the rest and must be the final level.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<String>,
}

impl TopicFilter {
    /// # Errors
    ///
    /// Returns an error if `s` is empty, `#` appears anywhere but as the
    /// final level, or `+`/`#` share a level with other characters.
    pub fn parse(s: &str) -> Result<Self, DecodeError> {
        if s.is_empty() {
            return Err(DecodeError::InvalidTopic);
        }
        let levels: Vec<String> = s.split('/').map(str::to_string).collect();
        for (i, level) in levels.iter().enumerate() {
            if level.contains('#') && level != "#" {
                return Err(DecodeError::InvalidTopic);
            }
            if level == "#" && i != levels.len() - 1 {
                return Err(DecodeError::InvalidTopic);
            }
            if level.contains('+') && level != "+" {
                return Err(DecodeError::InvalidTopic);
            }
        }
        Ok(Self {
            raw: s.to_string(),
            levels,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Implements the MQTT-3.1.1 matching table (§4.7.1, §4.7.2):
    /// `+` matches exactly one non-empty-filter level, `#` matches the
    /// remainder of the topic, and a filter starting with a wildcard never
    /// matches a `$`-prefixed system topic.
    #[must_use]
    pub fn matches(&self, topic: &TopicName) -> bool {
        if topic.is_system() {
            let starts_with_wildcard = matches!(self.levels.first().map(String::as_str), Some("#") | Some("+"));
            if starts_with_wildcard {
                return false;
            }
        }
        let topic_levels: Vec<&str> = topic.0.split('/').collect();
        Self::match_levels(&self.levels, &topic_levels)
    }

    fn match_levels(filter: &[String], topic: &[&str]) -> bool {
        match (filter.first(), topic.first()) {
            (Some(f), _) if f == "#" => true,
            (Some(f), Some(_)) if f == "+" => {
                if topic.len() == 1 {
                    filter.len() == 1
                } else {
                    Self::match_levels(&filter[1..], &topic[1..])
                }
            }
            (Some(f), Some(t)) if f == t => {
                if filter.len() == 1 && topic.len() == 1 {
                    true
                } else if filter.len() == 1 || topic.len() == 1 {
                    false
                } else {
                    Self::match_levels(&filter[1..], &topic[1..])
                }
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TopicName {
        TopicName::parse(s).unwrap()
    }
    fn f(s: &str) -> TopicFilter {
        TopicFilter::parse(s).unwrap()
    }

    #[test]
    fn plus_matches_one_level() {
        assert!(f("sport/+/player1").matches(&t("sport/tennis/player1")));
        assert!(!f("sport/+/player1").matches(&t("sport/tennis/player1/ranking")));
    }

    #[test]
    fn hash_matches_rest() {
        assert!(f("sport/#").matches(&t("sport")));
        assert!(f("sport/#").matches(&t("sport/tennis/player1")));
        assert!(f("#").matches(&t("a/b/c")));
    }

    #[test]
    fn bare_hash_excludes_sys() {
        assert!(!f("#").matches(&t("$SYS/broker/load")));
        assert!(!f("+/broker").matches(&t("$SYS/broker")));
        assert!(f("$SYS/#").matches(&t("$SYS/broker/load")));
    }

    #[test]
    fn literal_levels_must_match_exactly() {
        assert!(f("a/b/c").matches(&t("a/b/c")));
        assert!(!f("a/b").matches(&t("a/b/c")));
        assert!(!f("a/b/c").matches(&t("a/b")));
    }

    #[test]
    fn rejects_invalid_filters() {
        assert!(TopicFilter::parse("a/#/b").is_err());
        assert!(TopicFilter::parse("a/b#").is_err());
        assert!(TopicFilter::parse("").is_err());
    }

    #[test]
    fn rejects_invalid_topic_names() {
        assert!(TopicName::parse("").is_err());
        assert!(TopicName::parse("a/+").is_err());
        assert!(TopicName::parse("a/#").is_err());
    }
}
