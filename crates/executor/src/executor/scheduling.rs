use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, trace};

use crate::any_executable::AnyExecutable;
use crate::callback_group::CallbackGroup;
use crate::entity::Entity;
use crate::sync::{lock, write};
use crate::wait_set::WaitResultKind;
use crate::Result;

use super::core::{ExecutorBase, RebuildPolicy, WaitState};

impl ExecutorBase {
    /// Refresh the wait set if the structure changed, block until something
    /// is ready or `timeout` elapses, and replace the ready list with what
    /// the wait found.
    pub(crate) fn wait_for_work(&self, state: &mut WaitState, timeout: Option<Duration>) {
        let version = {
            let mut collection = lock(&self.collection);
            let notified = self.entities_need_rebuild.swap(false, Ordering::SeqCst);
            let stale = match self.rebuild_policy {
                RebuildPolicy::OnVersionChange => notified || collection.structure_changed(),
                RebuildPolicy::OnNotify => notified,
            };
            if stale {
                collection.refresh();
            } else if self.rebuild_policy == RebuildPolicy::OnNotify {
                debug_assert_eq!(
                    state.wait_set.built_version(),
                    Some(collection.version()),
                    "collection changed without a structural notification"
                );
            }
            if state.wait_set.build_or_reuse(&collection) {
                write(&self.metrics).record_rebuild();
            }
            state.wait_set.prepare();
            collection.version()
        };

        let result = state.wait_set.wait(timeout);
        let wakeups = state.wait_set.take_executor_wakeups();
        if wakeups.structure_notified {
            self.entities_need_rebuild.store(true, Ordering::SeqCst);
        }
        state.ready = state.wait_set.collect_ready();
        state.ready_version = Some(version);
        trace!(
            executor = %self.kind,
            ?result,
            ready = state.ready.len(),
            interrupted = wakeups.interrupted,
            shut_down = wakeups.shut_down,
            "wait returned"
        );
        write(&self.metrics).record_wait(result == WaitResultKind::Timeout);
    }

    /// Pop the first ready entry whose group can be taken from and take its
    /// data. Entries of unavailable or busy groups stay in the list.
    ///
    /// The list is dropped once the collection has moved past the version it
    /// was collected against: a detached node's entities are no longer this
    /// executor's to take. Entries removed from their group are skipped.
    pub(crate) fn next_ready(&self, state: &mut WaitState) -> Result<Option<AnyExecutable>> {
        if !state.ready.is_empty() {
            let version = lock(&self.collection).version();
            if state.ready_version != Some(version) {
                trace!(
                    executor = %self.kind,
                    dropped = state.ready.len(),
                    version,
                    "collection changed since the wait, ready list dropped"
                );
                state.ready.clear();
                return Ok(None);
            }
        }
        let mut index = 0;
        while index < state.ready.len() {
            let entry = &state.ready[index];
            let Some(group) = entry.group.upgrade() else {
                state.ready.remove(index);
                continue;
            };
            if !group.can_be_taken_from() {
                index += 1;
                continue;
            }
            let Some(entity) = entry.entity.upgrade() else {
                state.ready.remove(index);
                continue;
            };
            state.ready.remove(index);
            if !group.has_entity(entity.id()) {
                continue;
            }
            if let Some(executable) = self.take_executable(entity, group)? {
                return Ok(Some(executable));
            }
        }
        Ok(None)
    }

    /// Claim `group` and take the pending data of `entity`, which must have
    /// just been found ready. Returns `None` if the group is busy or the
    /// entity had nothing to take.
    pub(crate) fn take_executable(
        &self,
        entity: Entity,
        group: Arc<CallbackGroup>,
    ) -> Result<Option<AnyExecutable>> {
        if !group.try_begin_execution() {
            return Ok(None);
        }
        match entity.take_data() {
            Ok(Some(data)) => Ok(Some(AnyExecutable {
                entity,
                callback_group: group,
                data,
            })),
            Ok(None) => {
                group.end_execution();
                Ok(None)
            }
            Err(err) => {
                group.end_execution();
                error!(executor = %self.kind, entity = ?entity, error = %err, "contract violation");
                Err(err)
            }
        }
    }

    /// Next unit of work: from the current ready list, or after one wait of
    /// at most `timeout`. `None` on timeout or when the spin should stop.
    pub(crate) fn get_next_executable(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<AnyExecutable>> {
        let mut state = lock(&self.wait_state);
        if !self.keep_spinning() {
            return Ok(None);
        }
        if let Some(executable) = self.next_ready(&mut state)? {
            return Ok(Some(executable));
        }
        self.wait_for_work(&mut state, timeout);
        if !self.keep_spinning() {
            return Ok(None);
        }
        self.next_ready(&mut state)
    }
}
