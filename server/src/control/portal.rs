//! Portals teleport nearby players to another map.

use log::debug;
use realm_shared::EntityKind;

use super::{ControlError, Controller, WorldAction};
use crate::world::WorldMap;

/// Players this close to a portal are sent through it
pub const PORTAL_RADIUS: f32 = 4.0;

/// A player can only take a portal once per this window
pub const PORTAL_COOLDOWN_MS: u64 = 5_000;

pub struct PortalControl;

impl Controller for PortalControl {
    fn takes_damage(&self) -> bool {
        false
    }

    fn on_tick(
        &self,
        map: &mut WorldMap,
        gid: u64,
        now: u64,
        actions: &mut Vec<WorldAction>,
    ) -> Result<(), ControlError> {
        let portal = map.get(gid).ok_or(ControlError::EntityMissing(gid))?;
        let Some(to) = portal.portal_target().cloned() else {
            return Ok(());
        };

        let travellers: Vec<u64> = map
            .find_entities_in_radius(portal.x, portal.y, PORTAL_RADIUS)
            .into_iter()
            .filter(|e| e.kind() == EntityKind::Player && !e.is_dead())
            .map(|e| e.gid)
            .collect();

        for traveller in travellers {
            let Some(player) = map.get_mut(traveller) else {
                continue;
            };
            let Some(data) = player.player_mut() else {
                continue;
            };
            if !data.portal_cooldown.is_expired(now) {
                continue;
            }
            data.portal_cooldown.set(now + PORTAL_COOLDOWN_MS);
            debug!("Portal {} sends {} to '{}'", gid, traveller, to.name);
            actions.push(WorldAction::Transfer {
                gid: traveller,
                map: to.name.clone(),
                x: to.x,
                y: to.y,
            });
        }
        Ok(())
    }
}
