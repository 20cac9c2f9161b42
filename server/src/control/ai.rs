//! Monster AI: a patrol square while idle, sticky aggro on nearby players.

use log::debug;
use realm_shared::{Direction, EntityKind};

use super::{attack, follow, move_entity, step_towards};
use crate::world::WorldMap;

/// Pause before an idle monster starts (or resumes) patrolling
pub const IDLE_DELAY_MS: u64 = 5_000;

/// Patrol steps never leave this box around the spawn point
pub const PATROL_RANGE: f32 = 10.0;

/// Players within this radius draw aggro
pub const AGGRO_RADIUS: f32 = 10.0;

/// A chasing monster stops following this far from its spawn point
pub const LEASH_RANGE: f32 = 30.0;

/// One AI step for a living monster. An idle step lands before the aggro
/// check, so a monster that patrols into reach attacks on the same tick.
pub fn update(map: &mut WorldMap, gid: u64, now: u64) {
    idle(map, gid, now);
    aggro(map, gid, now);
}

/// Attack players in the aggro radius. A remembered target stays the target
/// as long as it exists and is alive, even if other players are closer.
fn aggro(map: &mut WorldMap, gid: u64, now: u64) {
    let Some(monster) = map.get(gid) else {
        return;
    };
    let remembered = monster.target;
    let nearby: Vec<(u64, EntityKind, bool)> = map
        .find_entities_in_radius(monster.x, monster.y, AGGRO_RADIUS)
        .into_iter()
        .filter(|e| e.gid != gid)
        .map(|e| (e.gid, e.kind(), e.is_dead()))
        .collect();

    let remembered = remembered.filter(|target| map.get(*target).is_some_and(|t| !t.is_dead()));
    let Some(monster) = map.get_mut(gid) else {
        return;
    };
    monster.target = remembered;
    if nearby.is_empty() {
        monster.target = None;
        monster.follow = None;
        return;
    }

    for (other, kind, dead) in nearby {
        if kind != EntityKind::Player {
            continue;
        }
        let target = match map.get(gid).and_then(|m| m.target) {
            Some(target) => target,
            None if !dead => {
                if let Some(monster) = map.get_mut(gid) {
                    monster.target = Some(other);
                }
                debug!("Monster {} aggroes on {}", gid, other);
                other
            }
            None => continue,
        };
        attack(map, gid, target, now);
    }

    chase(map, gid, now);
}

/// Close in on an out-of-reach target. Past the leash the monster holds its
/// ground but keeps the target; only the radius scan or death drops it.
fn chase(map: &mut WorldMap, gid: u64, now: u64) {
    let Some(monster) = map.get(gid) else {
        return;
    };
    let Some(target) = monster.target.and_then(|t| map.get(t)) else {
        return;
    };
    if monster.in_melee_range(target) {
        return;
    }
    let target_gid = target.gid;
    let leashed = monster.distance_to(monster.spawn_x, monster.spawn_y) > LEASH_RANGE;

    let Some(monster) = map.get_mut(gid) else {
        return;
    };
    if leashed {
        monster.follow = None;
        return;
    }
    monster.follow = Some(target_gid);
    follow(map, gid, target_gid, now);
}

/// Walk the patrol square around the spawn point while nothing is targeted
fn idle(map: &mut WorldMap, gid: u64, now: u64) {
    let (width, height) = (map.width, map.height);
    let Some(monster) = map.get(gid) else {
        return;
    };
    if monster.target.is_some() {
        return;
    }
    let Some(data) = monster.monster_data() else {
        return;
    };
    let (x, y, spawn_x, spawn_y) = (monster.x, monster.y, monster.spawn_x, monster.spawn_y);
    let ready = monster.move_cooldown.is_expired(now);
    let (idle_start, patrol) = (data.ai.idle_start, data.ai.patrol);

    let Some(start) = idle_start else {
        set_idle_state(map, gid, patrol, now);
        return;
    };
    if now.saturating_sub(start) < IDLE_DELAY_MS || !ready {
        return;
    }

    // Dragged away by a chase: walk home first
    let outside = (x - spawn_x).abs() > PATROL_RANGE || (y - spawn_y).abs() > PATROL_RANGE;
    if outside {
        step_towards(map, gid, spawn_x, spawn_y, now);
        return;
    }

    let (dx, dy) = patrol.delta();
    let (nx, ny) = (x + dx, y + dy);
    let within_patrol = (nx - spawn_x).abs() <= PATROL_RANGE && (ny - spawn_y).abs() <= PATROL_RANGE;
    let within_map = nx >= 0.0 && nx <= width && ny >= 0.0 && ny <= height;

    if within_patrol && within_map {
        move_entity(map, gid, patrol, now);
    } else {
        set_idle_state(map, gid, patrol.next_patrol(), now);
    }
}

/// Restart the idle pause, heading `patrol` once it runs out
fn set_idle_state(map: &mut WorldMap, gid: u64, patrol: Direction, now: u64) {
    if let Some(data) = map.get_mut(gid).and_then(|m| m.monster_mut()) {
        data.ai.patrol = patrol;
        data.ai.idle_start = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tests::dummy;
    use crate::entities::Entity;
    use crate::network::Connection;
    use crate::persistence::PlayerRecord;
    use crate::world::definitions::MapDefinition;

    fn player(gid: u64, x: f32, y: f32) -> Entity {
        let (connection, _rx) = Connection::channel();
        let mut record = PlayerRecord::new_for_account(gid as i64, format!("p{}", gid));
        record.x = x;
        record.y = y;
        Entity::player_from_record(gid, &record, connection)
    }

    fn field() -> WorldMap {
        WorldMap::new(MapDefinition::empty(2, "field", 200.0, 200.0))
    }

    #[test]
    fn test_idle_waits_before_patrolling() {
        let mut map = field();
        map.add_entity(dummy(1, 100.0, 100.0));

        update(&mut map, 1, 1_000);
        update(&mut map, 1, 1_000 + IDLE_DELAY_MS - 1);
        assert_eq!((map.get(1).unwrap().x, map.get(1).unwrap().y), (100.0, 100.0));

        update(&mut map, 1, 1_000 + IDLE_DELAY_MS);
        let monster = map.get(1).unwrap();
        assert_eq!((monster.x, monster.y), (100.0, 101.0));
        assert_eq!(monster.direction, Direction::Down);
    }

    #[test]
    fn test_patrol_stays_near_spawn() {
        let mut map = field();
        map.add_entity(dummy(1, 100.0, 100.0));

        let mut now = 1;
        let mut visited_corner = false;
        for _ in 0..2_000 {
            now += 250;
            update(&mut map, 1, now);
            let monster = map.get(1).unwrap();
            assert!((monster.x - 100.0).abs() <= PATROL_RANGE);
            assert!((monster.y - 100.0).abs() <= PATROL_RANGE);
            visited_corner |= monster.x == 110.0 && monster.y == 110.0;
        }
        assert!(visited_corner, "patrol should reach the far corner");
    }

    #[test]
    fn test_patrol_respects_map_bounds() {
        let mut map = field();
        map.add_entity(dummy(1, 198.0, 198.0));
        let mut now = 1;
        for _ in 0..500 {
            now += 250;
            update(&mut map, 1, now);
            let monster = map.get(1).unwrap();
            assert!(monster.x <= 200.0 && monster.y <= 200.0);
        }
    }

    #[test]
    fn test_aggro_is_sticky() {
        let mut map = field();
        map.add_entity(dummy(1, 50.0, 50.0));
        map.add_entity(player(2, 51.0, 50.0));

        update(&mut map, 1, 1_000);
        assert_eq!(map.get(1).unwrap().target, Some(2));
        let hp = map.get(2).unwrap().hp;
        assert!(hp < map.get(2).unwrap().hp_max);

        // A second, equally close player does not steal aggro
        map.add_entity(player(3, 49.0, 50.0));
        update(&mut map, 1, 100_000);
        assert_eq!(map.get(1).unwrap().target, Some(2));
        assert_eq!(map.get(3).unwrap().hp, map.get(3).unwrap().hp_max);
        assert!(map.get(2).unwrap().hp < hp);
    }

    #[test]
    fn test_dead_target_is_dropped() {
        let mut map = field();
        map.add_entity(dummy(1, 50.0, 50.0));
        map.add_entity(player(2, 51.0, 50.0));
        map.add_entity(player(3, 49.0, 50.0));
        update(&mut map, 1, 1_000);
        let first = map.get(1).unwrap().target.unwrap();
        let other = if first == 2 { 3 } else { 2 };

        map.get_mut(first).unwrap().hp = 0;
        update(&mut map, 1, 100_000);
        assert_eq!(map.get(1).unwrap().target, Some(other));
    }

    #[test]
    fn test_no_players_clears_target() {
        let mut map = field();
        map.add_entity(dummy(1, 50.0, 50.0));
        map.get_mut(1).unwrap().target = Some(42);
        update(&mut map, 1, 1_000);
        assert_eq!(map.get(1).unwrap().target, None);
    }

    #[test]
    fn test_monster_chases_target_out_of_reach() {
        let mut map = field();
        map.add_entity(dummy(1, 50.0, 50.0));
        map.add_entity(player(2, 55.0, 50.0));
        update(&mut map, 1, 1_000);
        let monster = map.get(1).unwrap();
        assert_eq!(monster.target, Some(2));
        assert_eq!(monster.x, 51.0);
    }

    #[test]
    fn test_patrol_step_then_attack_same_tick() {
        let mut map = field();
        map.add_entity(dummy(1, 100.0, 100.0));
        update(&mut map, 1, 1_000);

        // Two below the monster: out of reach until the patrol step lands
        map.add_entity(player(2, 100.0, 102.0));
        update(&mut map, 1, 1_000 + IDLE_DELAY_MS + 1);

        let monster = map.get(1).unwrap();
        assert_eq!((monster.x, monster.y), (100.0, 101.0));
        assert_eq!(monster.target, Some(2));
        let player = map.get(2).unwrap();
        assert!(player.hp < player.hp_max);
    }

    #[test]
    fn test_aggro_keeps_idle_timer() {
        let mut map = field();
        map.add_entity(dummy(1, 100.0, 100.0));
        update(&mut map, 1, 1_000);
        map.add_entity(player(2, 100.0, 105.0));
        update(&mut map, 1, 2_000);
        assert_eq!(map.get(1).unwrap().target, Some(2));

        // Player leaves the radius; the pause started at 1000 still counts
        map.get_mut(2).unwrap().y = 190.0;
        update(&mut map, 1, 1_000 + IDLE_DELAY_MS);
        let monster = map.get(1).unwrap();
        assert_eq!(monster.target, None);
        assert_eq!(monster.monster_data().unwrap().ai.idle_start, Some(1_000));
    }

    #[test]
    fn test_leashed_monster_keeps_visible_target() {
        let mut map = field();
        map.add_entity(dummy(1, 100.0, 100.0));
        map.add_entity(player(2, 134.0, 100.0));
        {
            let monster = map.get_mut(1).unwrap();
            monster.x = 131.0;
            monster.target = Some(2);
        }

        update(&mut map, 1, 1_000);
        let monster = map.get(1).unwrap();
        assert_eq!(monster.target, Some(2));
        assert_eq!(monster.follow, None);
        assert_eq!((monster.x, monster.y), (131.0, 100.0));
    }

    #[test]
    fn test_chase_inside_leash_follows() {
        let mut map = field();
        map.add_entity(dummy(1, 100.0, 100.0));
        map.add_entity(player(2, 128.0, 100.0));
        map.get_mut(1).unwrap().x = 125.0;

        update(&mut map, 1, 1_000);
        let monster = map.get(1).unwrap();
        assert_eq!(monster.target, Some(2));
        assert_eq!(monster.follow, Some(2));
        assert_eq!(monster.x, 126.0);
    }
}
