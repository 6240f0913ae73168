use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

mod filter;
mod mute;
mod policy;
mod thread;
mod view;

pub use filter::{
    CompiledFilters, Filter, FilterAction, FilterContext, FilterKeyword, FilterResult,
};
pub use mute::{CompiledMuteList, UserMute};
pub use policy::{
    default_interaction_policy_direct, default_interaction_policy_followers_only,
    default_interaction_policy_for, default_interaction_policy_public,
    default_interaction_policy_unlocked, policy_report, EntryFeasibility, InfeasibleEntry,
    Interaction, InteractionPolicy, PolicyConditions, PolicyEntries, PolicyEntry, PolicyReport,
    PolicyResult,
};
pub use thread::{topo_sort, ThreadNode};
pub use view::{
    status_source, status_to_web_view, ConvertError, StatusConverter, StatusEdit, StatusSource,
    StatusView,
};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum KernelError {
    #[error("validation error: {0}")]
    Validation(String),
}

/// Failure of a whole thread or status operation.
///
/// Per-item visibility and conversion failures never become a `ThreadError`;
/// they only narrow the result.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ThreadError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("internal error: {0}")]
    Internal(String),
    /// The caller went away before the operation finished.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl ThreadError {
    /// Wrap any storage or plumbing failure as an internal error, keeping its cause chain.
    #[must_use]
    pub fn internal(err: impl Display) -> Self {
        Self::Internal(format!("{err:#}"))
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Internal(_) => "internal",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// Opaque status identifier. Lexicographic order doubles as creation order.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct StatusId(pub String);

impl StatusId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StatusId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for StatusId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StatusId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for AccountId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Privacy tier of a status.
///
/// The ordinal is persisted. New levels go at the end; never reorder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Unlocked,
    FollowersOnly,
    MutualsOnly,
    Direct,
}

impl Visibility {
    pub const ALL: [Self; 5] =
        [Self::Public, Self::Unlocked, Self::FollowersOnly, Self::MutualsOnly, Self::Direct];

    #[must_use]
    pub fn ordinal(self) -> u8 {
        match self {
            Self::Public => 0,
            Self::Unlocked => 1,
            Self::FollowersOnly => 2,
            Self::MutualsOnly => 3,
            Self::Direct => 4,
        }
    }

    #[must_use]
    pub fn from_ordinal(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Public),
            1 => Some(Self::Unlocked),
            2 => Some(Self::FollowersOnly),
            3 => Some(Self::MutualsOnly),
            4 => Some(Self::Direct),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlocked => "unlocked",
            Self::FollowersOnly => "followers_only",
            Self::MutualsOnly => "mutuals_only",
            Self::Direct => "direct",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "unlocked" => Some(Self::Unlocked),
            "followers_only" => Some(Self::FollowersOnly),
            "mutuals_only" => Some(Self::MutualsOnly),
            "direct" => Some(Self::Direct),
            _ => None,
        }
    }

    /// Whether anonymous viewers may see a status at this level.
    #[must_use]
    pub fn is_public(self) -> bool {
        matches!(self, Self::Public | Self::Unlocked)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub username: String,
}

/// Directed follow edge: `account_id` follows `target_account_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Follow {
    pub account_id: AccountId,
    pub target_account_id: AccountId,
}

/// Directed block edge. Either direction hides content between the two accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub account_id: AccountId,
    pub target_account_id: AccountId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Status {
    pub id: StatusId,
    pub account_id: AccountId,
    pub in_reply_to_id: Option<StatusId>,
    pub in_reply_to_account_id: Option<AccountId>,
    pub boost_of_id: Option<StatusId>,
    pub visibility: Visibility,
    pub content: String,
    pub spoiler_text: String,
    pub sensitive: bool,
    pub mentions: Vec<AccountId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// `None` means the default policy for `visibility` applies.
    pub interaction_policy: Option<InteractionPolicy>,
}

impl Status {
    /// Validate write-time invariants for a locally authored status.
    ///
    /// # Errors
    /// Returns `KernelError::Validation` when identifiers are empty, reply fields are
    /// inconsistent, or a custom interaction policy is malformed.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.id.as_str().trim().is_empty() {
            return Err(KernelError::Validation("status id MUST be non-empty".to_string()));
        }
        if self.account_id.as_str().trim().is_empty() {
            return Err(KernelError::Validation("account_id MUST be non-empty".to_string()));
        }
        if self.in_reply_to_id.is_some() != self.in_reply_to_account_id.is_some() {
            return Err(KernelError::Validation(
                "in_reply_to_id and in_reply_to_account_id MUST be set together".to_string(),
            ));
        }
        if self.in_reply_to_id.as_ref() == Some(&self.id) {
            return Err(KernelError::Validation(format!(
                "status {} MUST NOT reply to itself",
                self.id
            )));
        }
        if self.boost_of_id.is_some() && self.in_reply_to_id.is_some() {
            return Err(KernelError::Validation("a boost MUST NOT be a reply".to_string()));
        }
        if self.updated_at < self.created_at {
            return Err(KernelError::Validation(
                "updated_at MUST NOT precede created_at".to_string(),
            ));
        }
        if let Some(policy) = &self.interaction_policy {
            policy.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub fn effective_interaction_policy(&self) -> InteractionPolicy {
        self.interaction_policy
            .clone()
            .unwrap_or_else(|| default_interaction_policy_for(self.visibility))
    }

    #[must_use]
    pub fn mentions_account(&self, account_id: &AccountId) -> bool {
        self.mentions.iter().any(|mentioned| mentioned == account_id)
    }

    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.updated_at != self.created_at
    }
}

/// Visible conversation around a target status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ContextResult {
    /// Oldest first.
    pub ancestors: Vec<StatusView>,
    /// Depth-first reading order.
    pub descendants: Vec<StatusView>,
}
