use anyhow::Result;
use thread_kernel_core::{
    topo_sort, Account, ContextResult, ConvertError, Status, StatusId, StatusView, ThreadError,
};
use tokio_util::sync::CancellationToken;

/// Loads a status and checks that the requester may see it.
pub trait TargetResolver {
    /// # Errors
    /// `NotFound` when the status does not exist, `Forbidden` when the requester
    /// may not see it, `Internal` for storage failures.
    fn visible_target_status(
        &self,
        requester: Option<&Account>,
        status_id: &StatusId,
    ) -> Result<Status, ThreadError>;
}

/// Raw reply-tree retrieval, unfiltered.
pub trait StatusRepository {
    /// # Errors
    /// Returns an error when the ancestor chain cannot be loaded.
    fn status_parents(&self, status: &Status) -> Result<Vec<Status>>;

    /// # Errors
    /// Returns an error when descendants cannot be loaded.
    fn status_children(&self, status_id: &StatusId) -> Result<Vec<Status>>;
}

pub trait VisibilityFilter {
    /// # Errors
    /// Returns an error when the relationships needed for the decision cannot be loaded.
    fn status_visible(&self, requester: Option<&Account>, status: &Status) -> Result<bool>;
}

/// Statuses that survived visibility filtering and conversion, plus how many did not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct FilterOutcome {
    pub kept: Vec<StatusView>,
    pub discarded: usize,
}

fn ensure_active(cancel: &CancellationToken, stage: &str) -> Result<(), ThreadError> {
    if cancel.is_cancelled() {
        tracing::debug!(stage, "thread assembly cancelled");
        return Err(ThreadError::Cancelled(format!("request cancelled before {stage}")));
    }
    Ok(())
}

pub(crate) fn filter_and_convert<V, C>(
    visibility: &V,
    requester: Option<&Account>,
    statuses: Vec<Status>,
    convert: &C,
    cancel: &CancellationToken,
) -> Result<FilterOutcome, ThreadError>
where
    V: VisibilityFilter + ?Sized,
    C: Fn(&Status, Option<&Account>) -> Result<StatusView, ConvertError>,
{
    let mut outcome = FilterOutcome { kept: Vec::with_capacity(statuses.len()), discarded: 0 };

    for status in statuses {
        ensure_active(cancel, "visibility check")?;
        match visibility.status_visible(requester, &status) {
            Ok(true) => {}
            Ok(false) => {
                outcome.discarded += 1;
                continue;
            }
            Err(err) => {
                tracing::debug!(status_id = %status.id, error = ?err, "visibility check failed");
                outcome.discarded += 1;
                continue;
            }
        }

        ensure_active(cancel, "conversion")?;
        match convert(&status, requester) {
            Ok(view) => outcome.kept.push(view),
            Err(err) => {
                tracing::debug!(status_id = %status.id, error = %err, "status conversion failed");
                outcome.discarded += 1;
            }
        }
    }

    Ok(outcome)
}

/// Assemble the visible conversation around `target_id`.
///
/// Only target resolution, bulk retrieval and cancellation can fail the call;
/// statuses that are invisible or fail conversion are left out. `cancel` is
/// checked before every collaborator call, and once it fires no further call is made.
pub(crate) fn context_get<R, C>(
    collaborators: &R,
    requester: Option<&Account>,
    target_id: &StatusId,
    convert: C,
    cancel: &CancellationToken,
) -> Result<ContextResult, ThreadError>
where
    R: TargetResolver + StatusRepository + VisibilityFilter + ?Sized,
    C: Fn(&Status, Option<&Account>) -> Result<StatusView, ConvertError>,
{
    ensure_active(cancel, "target resolution")?;
    let target = collaborators.visible_target_status(requester, target_id)?;

    ensure_active(cancel, "ancestor retrieval")?;
    let parents = collaborators.status_parents(&target).map_err(ThreadError::internal)?;
    let ancestors = filter_and_convert(collaborators, requester, parents, &convert, cancel)?;

    ensure_active(cancel, "descendant retrieval")?;
    let children = collaborators.status_children(&target.id).map_err(ThreadError::internal)?;
    let descendants = filter_and_convert(collaborators, requester, children, &convert, cancel)?;

    tracing::debug!(
        status_id = %target.id,
        ancestors_kept = ancestors.kept.len(),
        ancestors_discarded = ancestors.discarded,
        descendants_kept = descendants.kept.len(),
        descendants_discarded = descendants.discarded,
        "assembled thread context"
    );

    let mut ancestors = ancestors.kept;
    ancestors.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));

    Ok(ContextResult {
        ancestors,
        descendants: topo_sort(descendants.kept, target.account_id.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::{HashMap, HashSet};

    use anyhow::anyhow;
    use thread_kernel_core::{status_to_web_view, AccountId, Visibility};
    use time::OffsetDateTime;

    use super::*;

    #[derive(Default)]
    struct InMemoryThread {
        statuses: HashMap<StatusId, Status>,
        hidden: HashSet<StatusId>,
        broken_visibility: HashSet<StatusId>,
        fail_children: bool,
        calls: Cell<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl InMemoryThread {
        // Counts a collaborator call and fires the token once the budget is spent.
        fn record_call(&self) {
            let calls = self.calls.get() + 1;
            self.calls.set(calls);
            if let Some((limit, token)) = &self.cancel_after {
                if calls >= *limit {
                    token.cancel();
                }
            }
        }

        fn insert(&mut self, id: &str, author: &str, parent: Option<(&str, &str)>) {
            let status = Status {
                id: StatusId::from(id),
                account_id: AccountId::from(author),
                in_reply_to_id: parent.map(|(parent_id, _)| StatusId::from(parent_id)),
                in_reply_to_account_id: parent
                    .map(|(_, parent_author)| AccountId::from(parent_author)),
                boost_of_id: None,
                visibility: Visibility::Public,
                content: format!("status {id}"),
                spoiler_text: String::new(),
                sensitive: false,
                mentions: Vec::new(),
                created_at: OffsetDateTime::UNIX_EPOCH,
                updated_at: OffsetDateTime::UNIX_EPOCH,
                interaction_policy: None,
            };
            self.statuses.insert(status.id.clone(), status);
        }
    }

    impl TargetResolver for InMemoryThread {
        fn visible_target_status(
            &self,
            _requester: Option<&Account>,
            status_id: &StatusId,
        ) -> Result<Status, ThreadError> {
            self.record_call();
            if self.hidden.contains(status_id) {
                return Err(ThreadError::Forbidden(format!("{status_id} hidden")));
            }
            self.statuses
                .get(status_id)
                .cloned()
                .ok_or_else(|| ThreadError::NotFound(format!("{status_id} missing")))
        }
    }

    impl StatusRepository for InMemoryThread {
        fn status_parents(&self, status: &Status) -> Result<Vec<Status>> {
            self.record_call();
            let mut parents = Vec::new();
            let mut next = status.in_reply_to_id.clone();
            while let Some(parent) = next.and_then(|id| self.statuses.get(&id)) {
                next = parent.in_reply_to_id.clone();
                parents.push(parent.clone());
            }
            Ok(parents)
        }

        fn status_children(&self, status_id: &StatusId) -> Result<Vec<Status>> {
            self.record_call();
            if self.fail_children {
                return Err(anyhow!("replica unavailable"));
            }
            let mut found = Vec::new();
            let mut frontier = vec![status_id.clone()];
            while let Some(parent_id) = frontier.pop() {
                for status in self.statuses.values() {
                    if status.in_reply_to_id.as_ref() == Some(&parent_id) {
                        frontier.push(status.id.clone());
                        found.push(status.clone());
                    }
                }
            }
            Ok(found)
        }
    }

    impl VisibilityFilter for InMemoryThread {
        fn status_visible(&self, _requester: Option<&Account>, status: &Status) -> Result<bool> {
            self.record_call();
            if self.broken_visibility.contains(&status.id) {
                return Err(anyhow!("relationship lookup failed"));
            }
            Ok(!self.hidden.contains(&status.id))
        }
    }

    fn plain(status: &Status, _requester: Option<&Account>) -> Result<StatusView, ConvertError> {
        Ok(status_to_web_view(status))
    }

    fn ids(views: &[StatusView]) -> Vec<&str> {
        views.iter().map(|view| view.id.as_str()).collect()
    }

    fn fixture_thread() -> InMemoryThread {
        let mut thread = InMemoryThread::default();
        thread.insert("01", "alice", None);
        thread.insert("02", "bob", Some(("01", "alice")));
        thread.insert("03", "alice", Some(("02", "bob")));
        thread.insert("04", "carol", Some(("03", "alice")));
        thread.insert("06", "alice", Some(("03", "alice")));
        thread.insert("05", "bob", Some(("04", "carol")));
        thread
    }

    fn assemble(thread: &InMemoryThread, target: &str) -> ContextResult {
        match context_get(thread, None, &StatusId::from(target), plain, &CancellationToken::new()) {
            Ok(context) => context,
            Err(err) => panic!("context should assemble: {err}"),
        }
    }

    #[test]
    fn ancestors_sorted_ascending_and_descendants_topologically() {
        let context = assemble(&fixture_thread(), "03");
        assert_eq!(ids(&context.ancestors), vec!["01", "02"]);
        // 06 is alice replying to herself, so it precedes 04.
        assert_eq!(ids(&context.descendants), vec!["06", "04", "05"]);
    }

    #[test]
    fn root_and_leaf_have_empty_sides() {
        let thread = fixture_thread();
        assert!(assemble(&thread, "01").ancestors.is_empty());
        let leaf = assemble(&thread, "05");
        assert!(leaf.descendants.is_empty());
        assert_eq!(ids(&leaf.ancestors), vec!["01", "02", "03", "04"]);
    }

    #[test]
    fn invisible_and_failing_items_are_dropped_not_fatal() {
        let mut thread = fixture_thread();
        thread.hidden.insert(StatusId::from("02"));
        thread.broken_visibility.insert(StatusId::from("04"));

        let context = assemble(&thread, "03");
        assert_eq!(ids(&context.ancestors), vec!["01"]);
        // 05 replied to the dropped 04, so it now sits at top level.
        assert_eq!(ids(&context.descendants), vec!["06", "05"]);
    }

    #[test]
    fn conversion_failures_are_dropped() {
        let thread = fixture_thread();
        let refuse_bob = |status: &Status, _requester: Option<&Account>| {
            if status.account_id.as_str() == "bob" {
                return Err(ConvertError::Muted {
                    status_id: status.id.clone(),
                    account_id: status.account_id.clone(),
                });
            }
            Ok(status_to_web_view(status))
        };

        let live = CancellationToken::new();
        let context = match context_get(&thread, None, &StatusId::from("03"), refuse_bob, &live) {
            Ok(context) => context,
            Err(err) => panic!("context should assemble: {err}"),
        };
        assert_eq!(ids(&context.ancestors), vec!["01"]);
        assert_eq!(ids(&context.descendants), vec!["06", "04"]);
    }

    #[test]
    fn target_errors_propagate_unchanged() {
        let mut thread = fixture_thread();
        thread.hidden.insert(StatusId::from("03"));

        let live = CancellationToken::new();
        let missing = context_get(&thread, None, &StatusId::from("99"), plain, &live);
        assert!(matches!(missing, Err(ThreadError::NotFound(_))));
        let hidden = context_get(&thread, None, &StatusId::from("03"), plain, &live);
        assert!(matches!(hidden, Err(ThreadError::Forbidden(_))));
    }

    #[test]
    fn retrieval_failure_is_internal() {
        let mut thread = fixture_thread();
        thread.fail_children = true;

        match context_get(&thread, None, &StatusId::from("03"), plain, &CancellationToken::new()) {
            Err(ThreadError::Internal(message)) => assert!(message.contains("replica unavailable")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }

    #[test]
    fn filter_outcome_counts_discards() {
        let mut thread = fixture_thread();
        thread.hidden.insert(StatusId::from("02"));
        let statuses = thread.statuses.values().cloned().collect::<Vec<_>>();

        let outcome =
            match filter_and_convert(&thread, None, statuses, &plain, &CancellationToken::new()) {
                Ok(outcome) => outcome,
                Err(err) => panic!("filtering should succeed: {err}"),
            };
        assert_eq!(outcome.kept.len(), 5);
        assert_eq!(outcome.discarded, 1);
    }

    #[test]
    fn cancelled_token_stops_before_any_collaborator_call() {
        let thread = fixture_thread();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = context_get(&thread, None, &StatusId::from("03"), plain, &cancel);
        assert!(matches!(result, Err(ThreadError::Cancelled(_))), "got {result:?}");
        assert_eq!(thread.calls.get(), 0);
    }

    #[test]
    fn cancellation_mid_assembly_stops_further_calls() {
        let cancel = CancellationToken::new();
        let mut thread = fixture_thread();
        // target, parents, then the first ancestor visibility check fires the token.
        thread.cancel_after = Some((3, cancel.clone()));
        let converted = Cell::new(0_usize);
        let counting =
            |status: &Status, _requester: Option<&Account>| -> Result<StatusView, ConvertError> {
                converted.set(converted.get() + 1);
                Ok(status_to_web_view(status))
            };

        match context_get(&thread, None, &StatusId::from("03"), counting, &cancel) {
            Err(ThreadError::Cancelled(message)) => assert!(message.contains("conversion")),
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(thread.calls.get(), 3);
        assert_eq!(converted.get(), 0);
    }

    #[test]
    fn cancellation_between_sides_skips_descendant_retrieval() {
        let cancel = CancellationToken::new();
        let thread = fixture_thread();
        // 01 is the last ancestor converted; the descendants are never fetched.
        let cancel_on_root =
            |status: &Status, _requester: Option<&Account>| -> Result<StatusView, ConvertError> {
                if status.id.as_str() == "01" {
                    cancel.cancel();
                }
                Ok(status_to_web_view(status))
            };

        match context_get(&thread, None, &StatusId::from("03"), cancel_on_root, &cancel) {
            Err(ThreadError::Cancelled(message)) => {
                assert!(message.contains("descendant retrieval"), "message: {message}");
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        // target, parents, and one visibility check per ancestor.
        assert_eq!(thread.calls.get(), 4);
    }
}
