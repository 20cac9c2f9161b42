//! Monsters: AI driven, revive at their spawn point.

use super::{ai, ControlError, Controller, WorldAction};
use crate::entities::Entity;
use crate::world::WorldMap;

pub struct MonsterControl;

impl Controller for MonsterControl {
    fn revives(&self) -> bool {
        true
    }

    fn on_tick(
        &self,
        map: &mut WorldMap,
        gid: u64,
        now: u64,
        _actions: &mut Vec<WorldAction>,
    ) -> Result<(), ControlError> {
        if !map.contains(gid) {
            return Err(ControlError::EntityMissing(gid));
        }
        ai::update(map, gid, now);
        Ok(())
    }

    fn on_revive(&self, entity: &mut Entity, _actions: &mut Vec<WorldAction>) {
        entity.clear_intents();
        if let Some(data) = entity.monster_mut() {
            data.ai.idle_start = None;
            data.ai.patrol = Default::default();
        }
    }
}
