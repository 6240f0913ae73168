use std::path::PathBuf;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use thread_kernel_core::{
    policy_report, status_source, status_to_web_view, Account, AccountId, Block,
    CompiledFilters, CompiledMuteList, ContextResult, Filter, FilterAction, FilterContext,
    FilterKeyword, Follow, InteractionPolicy, PolicyReport, Status, StatusConverter, StatusEdit,
    StatusId, StatusSource, StatusView, ThreadError, UserMute, Visibility,
};
use thread_kernel_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};
use time::OffsetDateTime;

mod assembler;
mod visibility;

pub use assembler::{StatusRepository, TargetResolver, VisibilityFilter};
pub use tokio_util::sync::CancellationToken;

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddAccountRequest {
    pub id: Option<AccountId>,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddStatusRequest {
    pub id: Option<StatusId>,
    pub account_id: AccountId,
    /// The parent's author is looked up from storage.
    pub in_reply_to_id: Option<StatusId>,
    pub boost_of_id: Option<StatusId>,
    pub visibility: Visibility,
    pub content: String,
    pub spoiler_text: String,
    pub sensitive: bool,
    pub mentions: Vec<AccountId>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    pub interaction_policy: Option<InteractionPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddFilterRequest {
    pub id: Option<String>,
    pub account_id: AccountId,
    pub title: String,
    pub keywords: Vec<FilterKeyword>,
    pub contexts: Vec<FilterContext>,
    pub action: FilterAction,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct ThreadKernelApi {
    db_path: PathBuf,
}

impl ThreadKernelApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    fn open_read_store(&self) -> Result<SqliteStore, ThreadError> {
        self.open_store().map_err(ThreadError::internal)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Run `SQLite` health probes: quick check, foreign keys and schema status.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or a probe fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = SqliteStore::open(&self.db_path)?;
        store.integrity_check()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the account cannot be persisted.
    pub fn add_account(&self, input: AddAccountRequest) -> Result<Account> {
        let mut store = self.open_store()?;
        let account = Account {
            id: input.id.unwrap_or_default(),
            username: input.username,
        };
        store.write_account(&account)?;
        tracing::info!(account_id = %account.id, username = %account.username, "added account");
        Ok(account)
    }

    /// # Errors
    /// Returns an error when either account is unknown or the edge cannot be persisted.
    pub fn add_follow(&self, follow: Follow) -> Result<Follow> {
        let mut store = self.open_store()?;
        store.write_follow(&follow)?;
        Ok(follow)
    }

    /// # Errors
    /// Returns an error when either account is unknown or the edge cannot be persisted.
    pub fn add_block(&self, block: Block) -> Result<Block> {
        let mut store = self.open_store()?;
        store.write_block(&block)?;
        Ok(block)
    }

    /// # Errors
    /// Returns an error when either account is unknown or the mute cannot be persisted.
    pub fn add_mute(&self, mute: UserMute) -> Result<UserMute> {
        let mut store = self.open_store()?;
        store.write_mute(&mute)?;
        Ok(mute)
    }

    /// # Errors
    /// Returns an error when filter validation or persistence fails.
    pub fn add_filter(&self, input: AddFilterRequest) -> Result<Filter> {
        let mut store = self.open_store()?;
        let filter = Filter {
            id: input.id.unwrap_or_else(|| ulid::Ulid::new().to_string()),
            account_id: input.account_id,
            title: input.title,
            keywords: input.keywords,
            contexts: input.contexts,
            action: input.action,
            expires_at: input.expires_at,
        };
        CompiledFilters::new(std::slice::from_ref(&filter))?;
        store.write_filter(&filter)?;
        Ok(filter)
    }

    /// Add one locally authored status. A reply inherits its parent's author as
    /// `in_reply_to_account_id`.
    ///
    /// # Errors
    /// Returns an error when the parent is unknown, validation fails, or persistence fails.
    pub fn add_status(&self, input: AddStatusRequest) -> Result<Status> {
        let mut store = self.open_store()?;

        let in_reply_to_account_id = match &input.in_reply_to_id {
            Some(parent_id) => Some(
                store
                    .get_status(parent_id)?
                    .ok_or_else(|| anyhow!("parent status not found: {parent_id}"))?
                    .account_id,
            ),
            None => None,
        };

        let created_at = input.created_at.unwrap_or_else(OffsetDateTime::now_utc);
        let status = Status {
            id: input.id.unwrap_or_default(),
            account_id: input.account_id,
            in_reply_to_id: input.in_reply_to_id,
            in_reply_to_account_id,
            boost_of_id: input.boost_of_id,
            visibility: input.visibility,
            content: input.content,
            spoiler_text: input.spoiler_text,
            sensitive: input.sensitive,
            mentions: input.mentions,
            created_at,
            updated_at: created_at,
            interaction_policy: input.interaction_policy,
        };
        store.write_status(&status)?;

        let infeasible = status.effective_interaction_policy().infeasible_entries(status.visibility);
        if !infeasible.is_empty() {
            tracing::warn!(
                status_id = %status.id,
                infeasible = infeasible.len(),
                "interaction policy grants entries that cannot apply at this visibility"
            );
        }
        Ok(status)
    }

    /// Visible conversation around a status, personalized for `requester`.
    ///
    /// # Errors
    /// `NotFound`/`Forbidden` when the target is missing or hidden from the
    /// requester; `Internal` when storage fails; `Cancelled` once `cancel` fires.
    pub fn get_context(
        &self,
        requester: Option<&AccountId>,
        status_id: &StatusId,
        cancel: &CancellationToken,
    ) -> Result<ContextResult, ThreadError> {
        if cancel.is_cancelled() {
            return Err(ThreadError::Cancelled("request cancelled before requester lookup".into()));
        }
        let store = self.open_read_store()?;
        let requester = load_requester(&store, requester)?;
        let converter = requester_converter(&store, requester.as_ref())?;

        assembler::context_get(
            &store,
            requester.as_ref(),
            status_id,
            |status, _| converter.convert(status),
            cancel,
        )
    }

    /// Visible conversation around a status for an anonymous web viewer.
    ///
    /// # Errors
    /// `NotFound`/`Forbidden` when the target is missing or not public;
    /// `Internal` when storage fails; `Cancelled` once `cancel` fires.
    pub fn get_web_context(
        &self,
        status_id: &StatusId,
        cancel: &CancellationToken,
    ) -> Result<ContextResult, ThreadError> {
        let store = self.open_read_store()?;
        assembler::context_get(
            &store,
            None,
            status_id,
            |status, _| Ok(status_to_web_view(status)),
            cancel,
        )
    }

    /// # Errors
    /// `NotFound` when the status is missing or hidden by the requester's
    /// mutes or filters, `Forbidden` when it is not visible, `Internal` on storage failure.
    pub fn get_status(
        &self,
        requester: Option<&AccountId>,
        status_id: &StatusId,
    ) -> Result<StatusView, ThreadError> {
        let store = self.open_read_store()?;
        let requester = load_requester(&store, requester)?;
        let status = store.visible_target_status(requester.as_ref(), status_id)?;
        let converter = requester_converter(&store, requester.as_ref())?;

        converter.convert(&status).map_err(|err| ThreadError::NotFound(err.to_string()))
    }

    /// # Errors
    /// `NotFound`/`Forbidden` when the status is missing or not public; `Internal` on storage failure.
    pub fn get_web_status(&self, status_id: &StatusId) -> Result<StatusView, ThreadError> {
        let store = self.open_read_store()?;
        let status = store.visible_target_status(None, status_id)?;
        Ok(status_to_web_view(&status))
    }

    /// Editable source of a status. Boosts resolve to the boosted status, and
    /// only its author may read the source.
    ///
    /// # Errors
    /// `NotFound` when the status is missing or the requester is not the
    /// author, `Forbidden` when it is not visible, `Internal` on storage failure.
    pub fn get_status_source(
        &self,
        requester: &AccountId,
        status_id: &StatusId,
    ) -> Result<StatusSource, ThreadError> {
        let store = self.open_read_store()?;
        let requester = load_requester(&store, Some(requester))?;
        let mut status = store.visible_target_status(requester.as_ref(), status_id)?;

        if let Some(original_id) = status.boost_of_id.clone() {
            status = store.visible_target_status(requester.as_ref(), &original_id)?;
        }

        if requester.as_ref().map(|account| &account.id) != Some(&status.account_id) {
            return Err(ThreadError::NotFound(format!(
                "status {} is not authored by the requester",
                status.id
            )));
        }
        Ok(status_source(&status))
    }

    /// Edit history of a status. Only the latest version is stored, so the
    /// history holds one entry.
    ///
    /// # Errors
    /// Same as [`ThreadKernelApi::get_status`].
    pub fn get_status_history(
        &self,
        requester: Option<&AccountId>,
        status_id: &StatusId,
    ) -> Result<Vec<StatusEdit>, ThreadError> {
        let store = self.open_read_store()?;
        let requester = load_requester(&store, requester)?;
        let status = store.visible_target_status(requester.as_ref(), status_id)?;
        let converter = requester_converter(&store, requester.as_ref())?;
        let view =
            converter.convert(&status).map_err(|err| ThreadError::NotFound(err.to_string()))?;

        Ok(vec![StatusEdit::latest(&view, status.updated_at)])
    }

    /// Default interaction policy for `visibility` and the feasibility of every entry.
    #[must_use]
    pub fn default_policy(&self, visibility: Visibility) -> PolicyReport {
        policy_report(visibility)
    }
}

fn load_requester(
    store: &SqliteStore,
    requester: Option<&AccountId>,
) -> Result<Option<Account>, ThreadError> {
    let Some(account_id) = requester else {
        return Ok(None);
    };
    store
        .get_account(account_id)
        .map_err(ThreadError::internal)?
        .map(Some)
        .ok_or_else(|| ThreadError::Forbidden(format!("requester account {account_id} does not exist")))
}

// Anonymous requesters get an empty converter: nothing to mute or filter.
fn requester_converter(
    store: &SqliteStore,
    requester: Option<&Account>,
) -> Result<StatusConverter, ThreadError> {
    let (filters, mutes) = match requester {
        Some(account) => (
            store.account_filters(&account.id).map_err(ThreadError::internal)?,
            store.account_mutes(&account.id).map_err(ThreadError::internal)?,
        ),
        None => (Vec::new(), Vec::new()),
    };
    let compiled = CompiledFilters::new(&filters).map_err(ThreadError::internal)?;

    Ok(StatusConverter::new(
        compiled,
        CompiledMuteList::new(&mutes),
        FilterContext::Thread,
        OffsetDateTime::now_utc(),
    ))
}
