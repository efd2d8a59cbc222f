//! Entity collection: the nodes and callback groups attached to one
//! executor, tracked by weak reference, plus a structural version.
//!
//! The version moves on every attach, detach and refresh. Wait sets and the
//! events executor compare it against the version they were built from.

use std::sync::{Arc, Weak};

use tracing::{debug, info};
use uuid::Uuid;

use crate::callback_group::CallbackGroup;
use crate::entity::WeakEntity;
use crate::error::ExecutorError;
use crate::guard_condition::GuardCondition;
use crate::node::Node;
use crate::Result;

/// One entity together with the group it was collected from.
#[derive(Debug, Clone)]
pub(crate) struct CollectedEntity {
    pub(crate) entity: WeakEntity,
    pub(crate) group: Weak<CallbackGroup>,
}

#[derive(Debug)]
struct OwnerEntry {
    node: Weak<Node>,
    node_id: Uuid,
    name: String,
    observed_generation: u64,
    notify_guard: Arc<GuardCondition>,
}

#[derive(Debug)]
struct GroupEntry {
    group: Weak<CallbackGroup>,
    group_id: Uuid,
    /// Set when the group came in through its node rather than directly.
    owner: Option<Uuid>,
    observed_generation: u64,
    notify_guard: Arc<GuardCondition>,
}

#[derive(Debug, Default)]
pub struct EntityCollection {
    owners: Vec<OwnerEntry>,
    groups: Vec<GroupEntry>,
    version: u64,
}

impl EntityCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn has_owner(&self, node_id: Uuid) -> bool {
        self.owners.iter().any(|o| o.node_id == node_id)
    }

    pub fn has_group(&self, group_id: Uuid) -> bool {
        self.groups.iter().any(|g| g.group_id == group_id)
    }

    /// Attach `node` and every group it marks for automatic addition.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::NodeAlreadyAttached`] if the node belongs to an
    /// executor already; nothing is changed in that case.
    pub fn attach_owner(&mut self, node: &Arc<Node>) -> Result<()> {
        if !node.try_associate() {
            return Err(ExecutorError::NodeAlreadyAttached {
                node: node.name().to_string(),
            });
        }
        // Listen before reading the generation so no change slips between.
        let notify_guard = node.structure_signal().listen();
        let generation = node.structure_generation();
        self.owners.push(OwnerEntry {
            node: Arc::downgrade(node),
            node_id: node.id(),
            name: node.name().to_string(),
            observed_generation: generation,
            notify_guard: Arc::clone(&notify_guard),
        });
        let added = self.adopt_auto_groups(node, &notify_guard);
        self.version += 1;
        info!(node = %node.name(), groups = added, version = self.version, "node attached");
        Ok(())
    }

    /// Detach `node` together with the groups it brought in.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::NodeNotAttached`] if the node is not part of this
    /// collection.
    pub fn detach_owner(&mut self, node: &Arc<Node>) -> Result<()> {
        let node_id = node.id();
        let Some(pos) = self.owners.iter().position(|o| o.node_id == node_id) else {
            return Err(ExecutorError::NodeNotAttached {
                node: node.name().to_string(),
            });
        };
        self.owners.remove(pos);
        self.groups.retain(|entry| {
            if entry.owner != Some(node_id) {
                return true;
            }
            if let Some(group) = entry.group.upgrade() {
                group.dissociate();
            }
            false
        });
        node.dissociate();
        self.prune_expired();
        self.version += 1;
        info!(node = %node.name(), version = self.version, "node detached");
        Ok(())
    }

    /// Attach a single group of `node` without attaching the node itself.
    ///
    /// # Errors
    ///
    /// [`ExecutorError::GroupNotOwnedByNode`] or
    /// [`ExecutorError::CallbackGroupAlreadyAttached`]; nothing is changed
    /// in either case.
    pub fn attach_group(&mut self, group: &Arc<CallbackGroup>, node: &Arc<Node>) -> Result<()> {
        if !node.owns_group(group) {
            return Err(ExecutorError::GroupNotOwnedByNode {
                group: group.id(),
                node: node.name().to_string(),
            });
        }
        if !group.try_associate() {
            return Err(ExecutorError::CallbackGroupAlreadyAttached { group: group.id() });
        }
        let notify_guard = group.structure().listen();
        self.groups.push(GroupEntry {
            group: Arc::downgrade(group),
            group_id: group.id(),
            owner: None,
            observed_generation: group.structure().generation(),
            notify_guard,
        });
        self.version += 1;
        info!(group = %group.id(), node = %node.name(), version = self.version, "callback group attached");
        Ok(())
    }

    /// # Errors
    ///
    /// [`ExecutorError::CallbackGroupNotAttached`] if the group is not part
    /// of this collection.
    pub fn detach_group(&mut self, group: &Arc<CallbackGroup>) -> Result<()> {
        let Some(pos) = self.groups.iter().position(|g| g.group_id == group.id()) else {
            return Err(ExecutorError::CallbackGroupNotAttached { group: group.id() });
        };
        self.groups.remove(pos);
        group.dissociate();
        self.prune_expired();
        self.version += 1;
        info!(group = %group.id(), version = self.version, "callback group detached");
        Ok(())
    }

    /// Whether any attached node or group changed structure (or went away)
    /// since the last attach or refresh.
    pub fn structure_changed(&self) -> bool {
        let owners = self.owners.iter().any(|o| match o.node.upgrade() {
            Some(node) => node.structure_generation() != o.observed_generation,
            None => true,
        });
        owners
            || self.groups.iter().any(|g| match g.group.upgrade() {
                Some(group) => group.structure().generation() != g.observed_generation,
                None => true,
            })
    }

    /// Prune expired references, adopt automatically added groups created
    /// since the node was attached, and move the version.
    pub fn refresh(&mut self) {
        self.prune_expired();
        let nodes: Vec<Arc<Node>> = self.owners.iter().filter_map(|o| o.node.upgrade()).collect();
        for node in &nodes {
            let generation = node.structure_generation();
            let Some((observed, notify_guard)) = self
                .owners
                .iter()
                .find(|o| o.node_id == node.id())
                .map(|o| (o.observed_generation, Arc::clone(&o.notify_guard)))
            else {
                continue;
            };
            if observed == generation {
                continue;
            }
            let added = self.adopt_auto_groups(node, &notify_guard);
            if added > 0 {
                debug!(node = %node.name(), groups = added, "adopted new callback groups");
            }
            if let Some(owner) = self.owners.iter_mut().find(|o| o.node_id == node.id()) {
                owner.observed_generation = generation;
            }
        }
        for entry in &mut self.groups {
            if let Some(group) = entry.group.upgrade() {
                entry.observed_generation = group.structure().generation();
            }
        }
        self.version += 1;
        debug!(version = self.version, "entity collection refreshed");
    }

    /// Every live entity of every attached group, in attach order.
    pub(crate) fn entities(&self) -> Vec<CollectedEntity> {
        self.groups
            .iter()
            .filter_map(|g| g.group.upgrade())
            .flat_map(|group| {
                let weak_group = Arc::downgrade(&group);
                group
                    .collect_entities()
                    .into_iter()
                    .map(move |entity| CollectedEntity {
                        entity,
                        group: weak_group.clone(),
                    })
            })
            .collect()
    }

    /// Live attached groups, in attach order.
    pub fn groups(&self) -> Vec<Arc<CallbackGroup>> {
        self.groups.iter().filter_map(|g| g.group.upgrade()).collect()
    }

    /// Notify guard conditions of this collection's attachments, one per
    /// attached node or directly attached group. Owned by this collection,
    /// so no other executor consumes their triggers. May contain duplicates.
    pub(crate) fn notify_guards(&self) -> Vec<Arc<GuardCondition>> {
        self.owners
            .iter()
            .map(|o| Arc::clone(&o.notify_guard))
            .chain(self.groups.iter().map(|g| Arc::clone(&g.notify_guard)))
            .collect()
    }

    /// Detach everything, releasing node and group associations.
    pub fn clear(&mut self) {
        for entry in self.groups.drain(..) {
            if let Some(group) = entry.group.upgrade() {
                group.dissociate();
            }
        }
        for owner in self.owners.drain(..) {
            if let Some(node) = owner.node.upgrade() {
                node.dissociate();
                debug!(node = %owner.name, "node released");
            }
        }
        self.version += 1;
    }

    fn adopt_auto_groups(&mut self, node: &Arc<Node>, notify_guard: &Arc<GuardCondition>) -> usize {
        let mut added = 0;
        node.for_each_callback_group(|group| {
            if group.automatically_add_to_executor() && group.try_associate() {
                self.groups.push(GroupEntry {
                    group: Arc::downgrade(group),
                    group_id: group.id(),
                    owner: Some(node.id()),
                    observed_generation: group.structure().generation(),
                    notify_guard: Arc::clone(notify_guard),
                });
                added += 1;
            }
        });
        added
    }

    fn prune_expired(&mut self) {
        let owners_before = self.owners.len();
        let groups_before = self.groups.len();
        let gone: Vec<Uuid> = self
            .owners
            .iter()
            .filter(|o| o.node.strong_count() == 0)
            .map(|o| o.node_id)
            .collect();
        self.owners.retain(|o| o.node.strong_count() > 0);
        self.groups.retain(|g| {
            g.group.strong_count() > 0 && !g.owner.is_some_and(|id| gone.contains(&id))
        });
        let pruned = (owners_before - self.owners.len()) + (groups_before - self.groups.len());
        if pruned > 0 {
            debug!(
                owners = owners_before - self.owners.len(),
                groups = groups_before - self.groups.len(),
                "pruned expired references"
            );
        }
    }
}
