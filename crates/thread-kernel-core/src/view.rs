use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    AccountId, CompiledFilters, CompiledMuteList, FilterAction, FilterContext, FilterResult,
    InteractionPolicy, Status, StatusId, ThreadNode, Visibility,
};

/// Why a status could not be turned into a view for a requester.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConvertError {
    #[error("status {status_id} hidden by filter {filter_id}")]
    HiddenByFilter { status_id: StatusId, filter_id: String },
    #[error("status {status_id} hidden: author {account_id} is muted")]
    Muted { status_id: StatusId, account_id: AccountId },
}

/// Output form of a status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusView {
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
    #[serde(with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    pub interaction_policy: InteractionPolicy,
    pub filtered: Vec<FilterResult>,
}

impl ThreadNode for StatusView {
    fn node_id(&self) -> &str {
        self.id.as_str()
    }

    fn author_id(&self) -> &str {
        self.account_id.as_str()
    }

    fn parent_id(&self) -> Option<&str> {
        self.in_reply_to_id.as_ref().map(StatusId::as_str)
    }

    fn parent_author_id(&self) -> Option<&str> {
        self.in_reply_to_account_id.as_ref().map(AccountId::as_str)
    }
}

/// Plain conversion used for anonymous web viewers: no filters, no mutes.
#[must_use]
pub fn status_to_web_view(status: &Status) -> StatusView {
    StatusView {
        id: status.id.clone(),
        account_id: status.account_id.clone(),
        in_reply_to_id: status.in_reply_to_id.clone(),
        in_reply_to_account_id: status.in_reply_to_account_id.clone(),
        boost_of_id: status.boost_of_id.clone(),
        visibility: status.visibility,
        content: status.content.clone(),
        spoiler_text: status.spoiler_text.clone(),
        sensitive: status.sensitive,
        mentions: status.mentions.clone(),
        created_at: status.created_at,
        edited_at: status.is_edited().then_some(status.updated_at),
        interaction_policy: status.effective_interaction_policy(),
        filtered: Vec::new(),
    }
}

/// Personalized conversion for an authenticated requester.
///
/// Statuses from muted authors and statuses matching a `hide` filter fail to
/// convert; `warn` matches are attached to the view.
#[derive(Debug, Clone)]
pub struct StatusConverter {
    filters: CompiledFilters,
    mutes: CompiledMuteList,
    context: FilterContext,
    now: OffsetDateTime,
}

impl StatusConverter {
    #[must_use]
    pub fn new(
        filters: CompiledFilters,
        mutes: CompiledMuteList,
        context: FilterContext,
        now: OffsetDateTime,
    ) -> Self {
        Self { filters, mutes, context, now }
    }

    /// # Errors
    /// Returns `ConvertError` when the author is muted or a `hide` filter matches.
    pub fn convert(&self, status: &Status) -> Result<StatusView, ConvertError> {
        if self.mutes.status_muted(status, self.now) {
            return Err(ConvertError::Muted {
                status_id: status.id.clone(),
                account_id: status.account_id.clone(),
            });
        }

        let filtered = self.filters.matches(status, self.context, self.now);
        if let Some(hidden) = filtered.iter().find(|result| result.action == FilterAction::Hide) {
            return Err(ConvertError::HiddenByFilter {
                status_id: status.id.clone(),
                filter_id: hidden.filter_id.clone(),
            });
        }

        let mut view = status_to_web_view(status);
        view.filtered = filtered;
        Ok(view)
    }
}

/// Editable source of a status, returned only to its author.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusSource {
    pub id: StatusId,
    pub text: String,
    pub spoiler_text: String,
}

#[must_use]
pub fn status_source(status: &Status) -> StatusSource {
    StatusSource {
        id: status.id.clone(),
        text: status.content.clone(),
        spoiler_text: status.spoiler_text.clone(),
    }
}

/// One entry of a status' edit history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusEdit {
    pub content: String,
    pub spoiler_text: String,
    pub sensitive: bool,
    pub account_id: AccountId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl StatusEdit {
    /// The version shown in `view`, stamped with the status' last update time.
    #[must_use]
    pub fn latest(view: &StatusView, updated_at: OffsetDateTime) -> Self {
        Self {
            content: view.content.clone(),
            spoiler_text: view.spoiler_text.clone(),
            sensitive: view.sensitive,
            account_id: view.account_id.clone(),
            created_at: updated_at,
        }
    }
}
