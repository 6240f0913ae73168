use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{AccountId, Status};

/// `account_id` has muted `target_account_id`, optionally until `expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserMute {
    pub account_id: AccountId,
    pub target_account_id: AccountId,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

/// A requester's mutes, keyed by muted account for constant-time lookup.
#[derive(Debug, Clone, Default)]
pub struct CompiledMuteList {
    // `None` never expires.
    expiries: HashMap<AccountId, Option<OffsetDateTime>>,
}

impl CompiledMuteList {
    /// When one account is muted more than once, the longest-lived mute wins.
    #[must_use]
    pub fn new(mutes: &[UserMute]) -> Self {
        let mut expiries: HashMap<AccountId, Option<OffsetDateTime>> = HashMap::new();
        for mute in mutes {
            expiries
                .entry(mute.target_account_id.clone())
                .and_modify(|current| {
                    *current = match (*current, mute.expires_at) {
                        (Some(lhs), Some(rhs)) => Some(lhs.max(rhs)),
                        _ => None,
                    };
                })
                .or_insert(mute.expires_at);
        }
        Self { expiries }
    }

    #[must_use]
    pub fn muted(&self, account_id: &AccountId, now: OffsetDateTime) -> bool {
        match self.expiries.get(account_id) {
            Some(None) => true,
            Some(Some(expires_at)) => *expires_at > now,
            None => false,
        }
    }

    #[must_use]
    pub fn status_muted(&self, status: &Status, now: OffsetDateTime) -> bool {
        self.muted(&status.account_id, now)
    }
}
