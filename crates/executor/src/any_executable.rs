use std::fmt;
use std::sync::Arc;

use crate::callback_group::CallbackGroup;
use crate::entity::{Entity, EntityKind, Payload};

/// One ready unit of work: the entity, the group it was dispatched under,
/// and the payload already taken from it.
pub struct AnyExecutable {
    pub entity: Entity,
    pub callback_group: Arc<CallbackGroup>,
    pub data: Payload,
}

impl AnyExecutable {
    pub fn kind(&self) -> EntityKind {
        self.entity.kind()
    }
}

impl fmt::Debug for AnyExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyExecutable")
            .field("entity", &self.entity)
            .field("callback_group", &self.callback_group.id())
            .finish()
    }
}
