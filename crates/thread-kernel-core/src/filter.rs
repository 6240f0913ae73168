use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AccountId, KernelError, Status};

/// Where a filter applies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FilterContext {
    Home,
    Notifications,
    Public,
    Thread,
    Account,
}

impl FilterContext {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "home",
            Self::Notifications => "notifications",
            Self::Public => "public",
            Self::Thread => "thread",
            Self::Account => "account",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "home" => Some(Self::Home),
            "notifications" => Some(Self::Notifications),
            "public" => Some(Self::Public),
            "thread" => Some(Self::Thread),
            "account" => Some(Self::Account),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FilterAction {
    /// Keep the status, annotated with the match.
    Warn,
    /// Drop the status.
    Hide,
}

impl FilterAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Hide => "hide",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "warn" => Some(Self::Warn),
            "hide" => Some(Self::Hide),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterKeyword {
    pub keyword: String,
    pub whole_word: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Filter {
    pub id: String,
    pub account_id: AccountId,
    pub title: String,
    pub keywords: Vec<FilterKeyword>,
    pub contexts: Vec<FilterContext>,
    pub action: FilterAction,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl Filter {
    /// # Errors
    /// Returns `KernelError::Validation` when the title, keyword list, or context list is empty.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.title.trim().is_empty() {
            return Err(KernelError::Validation("filter title MUST be non-empty".to_string()));
        }
        if self.contexts.is_empty() {
            return Err(KernelError::Validation(
                "filter MUST apply to at least one context".to_string(),
            ));
        }
        if self.keywords.is_empty() {
            return Err(KernelError::Validation("filter MUST have at least one keyword".to_string()));
        }
        if self.keywords.iter().any(|keyword| keyword.keyword.trim().is_empty()) {
            return Err(KernelError::Validation("filter keywords MUST be non-empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// A filter that matched a status, attached to the converted view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterResult {
    pub filter_id: String,
    pub title: String,
    pub action: FilterAction,
    pub keyword_matches: Vec<String>,
}

#[derive(Debug, Clone)]
struct CompiledFilter {
    filter: Filter,
    patterns: Vec<(String, Regex)>,
}

/// A requester's filters with keyword patterns compiled once per request.
#[derive(Debug, Clone, Default)]
pub struct CompiledFilters {
    filters: Vec<CompiledFilter>,
}

impl CompiledFilters {
    /// # Errors
    /// Returns `KernelError::Validation` when a keyword cannot be compiled to a pattern.
    pub fn new(filters: &[Filter]) -> Result<Self, KernelError> {
        let mut compiled = Vec::with_capacity(filters.len());
        for filter in filters {
            let mut patterns = Vec::with_capacity(filter.keywords.len());
            for keyword in &filter.keywords {
                let pattern = Regex::new(&keyword_pattern(keyword)).map_err(|err| {
                    KernelError::Validation(format!(
                        "filter {} keyword `{}` is invalid: {err}",
                        filter.id, keyword.keyword
                    ))
                })?;
                patterns.push((keyword.keyword.clone(), pattern));
            }
            compiled.push(CompiledFilter { filter: filter.clone(), patterns });
        }
        Ok(Self { filters: compiled })
    }

    /// Filters in `context` whose keywords match the status text, in input order.
    #[must_use]
    pub fn matches(
        &self,
        status: &Status,
        context: FilterContext,
        now: OffsetDateTime,
    ) -> Vec<FilterResult> {
        let haystacks = [status.spoiler_text.as_str(), status.content.as_str()];
        self.filters
            .iter()
            .filter(|compiled| {
                compiled.filter.contexts.contains(&context) && !compiled.filter.expired(now)
            })
            .filter_map(|compiled| {
                let keyword_matches = compiled
                    .patterns
                    .iter()
                    .filter(|(_, pattern)| haystacks.iter().any(|text| pattern.is_match(text)))
                    .map(|(keyword, _)| keyword.clone())
                    .collect::<Vec<_>>();
                (!keyword_matches.is_empty()).then(|| FilterResult {
                    filter_id: compiled.filter.id.clone(),
                    title: compiled.filter.title.clone(),
                    action: compiled.filter.action,
                    keyword_matches,
                })
            })
            .collect()
    }
}

fn is_word_char(value: char) -> bool {
    value.is_alphanumeric() || value == '_'
}

// Word boundaries only make sense next to word characters, so "#tag" still
// matches as a whole word.
fn keyword_pattern(keyword: &FilterKeyword) -> String {
    let text = keyword.keyword.trim();
    let escaped = regex::escape(text);
    if !keyword.whole_word {
        return format!("(?i){escaped}");
    }

    let prefix = if text.starts_with(is_word_char) { r"\b" } else { "" };
    let suffix = if text.ends_with(is_word_char) { r"\b" } else { "" };
    format!("(?i){prefix}{escaped}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StatusId, Visibility};
    use time::Duration;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn status_with(content: &str, spoiler_text: &str) -> Status {
        Status {
            id: StatusId::from("01HZX0000000000000000000A1"),
            account_id: AccountId::from("bob"),
            in_reply_to_id: None,
            in_reply_to_account_id: None,
            boost_of_id: None,
            visibility: Visibility::Public,
            content: content.to_string(),
            spoiler_text: spoiler_text.to_string(),
            sensitive: false,
            mentions: Vec::new(),
            created_at: fixture_time(),
            updated_at: fixture_time(),
            interaction_policy: None,
        }
    }

    fn filter(keyword: &str, whole_word: bool, contexts: Vec<FilterContext>) -> Filter {
        Filter {
            id: format!("filter-{keyword}"),
            account_id: AccountId::from("viewer"),
            title: format!("no {keyword}"),
            keywords: vec![FilterKeyword { keyword: keyword.to_string(), whole_word }],
            contexts,
            action: FilterAction::Warn,
            expires_at: None,
        }
    }

    fn compile(filters: &[Filter]) -> CompiledFilters {
        match CompiledFilters::new(filters) {
            Ok(compiled) => compiled,
            Err(err) => panic!("fixture filters should compile: {err}"),
        }
    }

    #[test]
    fn whole_word_keyword_ignores_substrings() {
        let compiled = compile(&[filter("cat", true, vec![FilterContext::Thread])]);
        let now = fixture_time();
        assert!(compiled.matches(&status_with("concatenate", ""), FilterContext::Thread, now).is_empty());
        assert_eq!(
            compiled.matches(&status_with("my Cat is asleep", ""), FilterContext::Thread, now).len(),
            1
        );
    }

    #[test]
    fn substring_keyword_matches_inside_words() {
        let compiled = compile(&[filter("cat", false, vec![FilterContext::Thread])]);
        let results =
            compiled.matches(&status_with("concatenate", ""), FilterContext::Thread, fixture_time());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].keyword_matches, vec!["cat".to_string()]);
    }

    #[test]
    fn whole_word_keywords_respect_unicode_letters() {
        let now = fixture_time();
        let hits = |keyword: &str, content: &str| {
            compile(&[filter(keyword, true, vec![FilterContext::Thread])])
                .matches(&status_with(content, ""), FilterContext::Thread, now)
                .len()
        };
        assert_eq!(hits("café", "I love café"), 1);
        assert_eq!(hits("über", "über alles"), 1);
        assert_eq!(hits("cat", "écat"), 0);
    }

    #[test]
    fn whole_word_hashtag_keyword_matches() {
        let compiled = compile(&[filter("#spoilers", true, vec![FilterContext::Thread])]);
        let results = compiled.matches(
            &status_with("finale tonight #spoilers", ""),
            FilterContext::Thread,
            fixture_time(),
        );
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn spoiler_text_is_searched() {
        let compiled = compile(&[filter("election", true, vec![FilterContext::Thread])]);
        let results = compiled.matches(
            &status_with("details inside", "Election results"),
            FilterContext::Thread,
            fixture_time(),
        );
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn other_contexts_and_expired_filters_do_not_apply() {
        let now = fixture_time();
        let mut expired = filter("cat", true, vec![FilterContext::Thread]);
        expired.expires_at = Some(now - Duration::hours(1));
        let compiled = compile(&[filter("cat", true, vec![FilterContext::Home]), expired]);
        assert!(compiled.matches(&status_with("a cat", ""), FilterContext::Thread, now).is_empty());
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let compiled = compile(&[filter("c++", false, vec![FilterContext::Thread])]);
        let now = fixture_time();
        assert_eq!(compiled.matches(&status_with("learning C++", ""), FilterContext::Thread, now).len(), 1);
        assert!(compiled.matches(&status_with("ccc", ""), FilterContext::Thread, now).is_empty());
    }

    #[test]
    fn validate_rejects_empty_keywords() {
        let mut invalid = filter("cat", true, vec![FilterContext::Thread]);
        invalid.keywords.push(FilterKeyword { keyword: "  ".to_string(), whole_word: false });
        assert!(invalid.validate().is_err());
        assert_eq!(filter("cat", true, vec![FilterContext::Thread]).validate(), Ok(()));
    }
}
