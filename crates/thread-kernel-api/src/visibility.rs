use anyhow::Result;
use thread_kernel_core::{Account, Status, StatusId, ThreadError, Visibility};
use thread_kernel_store_sqlite::SqliteStore;

use crate::assembler::{StatusRepository, TargetResolver, VisibilityFilter};

impl StatusRepository for SqliteStore {
    fn status_parents(&self, status: &Status) -> Result<Vec<Status>> {
        SqliteStore::status_parents(self, status)
    }

    fn status_children(&self, status_id: &StatusId) -> Result<Vec<Status>> {
        SqliteStore::status_children(self, status_id)
    }
}

impl VisibilityFilter for SqliteStore {
    fn status_visible(&self, requester: Option<&Account>, status: &Status) -> Result<bool> {
        if !visible_ignoring_boost(self, requester, status)? {
            return Ok(false);
        }

        // A boost is only as visible as the status it wraps.
        let Some(original_id) = &status.boost_of_id else {
            return Ok(true);
        };
        match self.get_status(original_id)? {
            Some(original) => visible_ignoring_boost(self, requester, &original),
            None => Ok(false),
        }
    }
}

impl TargetResolver for SqliteStore {
    fn visible_target_status(
        &self,
        requester: Option<&Account>,
        status_id: &StatusId,
    ) -> Result<Status, ThreadError> {
        let status = self
            .get_status(status_id)
            .map_err(ThreadError::internal)?
            .ok_or_else(|| ThreadError::NotFound(format!("status {status_id} does not exist")))?;

        if !self.status_visible(requester, &status).map_err(ThreadError::internal)? {
            return Err(ThreadError::Forbidden(format!(
                "status {status_id} is not visible to the requester"
            )));
        }
        Ok(status)
    }
}

fn visible_ignoring_boost(
    store: &SqliteStore,
    requester: Option<&Account>,
    status: &Status,
) -> Result<bool> {
    let Some(requester) = requester else {
        return Ok(status.visibility.is_public());
    };

    if requester.id == status.account_id {
        return Ok(true);
    }
    if store.is_blocked_either_way(&requester.id, &status.account_id)? {
        return Ok(false);
    }

    let mentioned = status.mentions_account(&requester.id);
    let visible = match status.visibility {
        Visibility::Public | Visibility::Unlocked => true,
        Visibility::FollowersOnly => {
            mentioned || store.is_following(&requester.id, &status.account_id)?
        }
        Visibility::MutualsOnly => {
            mentioned
                || (store.is_following(&requester.id, &status.account_id)?
                    && store.is_following(&status.account_id, &requester.id)?)
        }
        Visibility::Direct => mentioned,
    };
    Ok(visible)
}
