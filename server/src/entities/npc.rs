//! Server-side NPC entity.

use super::{Entity, Payload};

/// NPC-specific payload
#[derive(Debug, Clone)]
pub struct NpcData {
    /// Dialog pages shown one at a time
    pub dialog: Vec<String>,
}

impl Entity {
    /// Stationary dialog NPC
    pub fn npc(gid: u64, name: impl Into<String>, x: f32, y: f32, dialog: Vec<String>) -> Self {
        Entity::base(gid, name.into(), x, y, Payload::Npc(NpcData { dialog }))
    }

    pub fn dialog_page(&self, page: usize) -> Option<&str> {
        match &self.payload {
            Payload::Npc(npc) => npc.dialog.get(page).map(String::as_str),
            _ => None,
        }
    }
}
