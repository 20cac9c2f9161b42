//! Chat command system for player commands.

use log::{error, info};

use crate::entities::SavePoint;
use crate::packets;
use crate::world::{World, WorldError};

/// Allowed character name length
const NAME_LENGTH: std::ops::RangeInclusive<usize> = 3..=16;

/// Result of executing a command
pub struct CommandResult {
    /// Whether the command was successful
    pub success: bool,
    /// Message to display to the user
    pub message: String,
}

impl CommandResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Parse and execute a chat command
/// Returns None if it's not a command (doesn't start with /)
pub fn parse_and_execute(content: &str, gid: u64, world: &mut World, now: u64) -> Option<CommandResult> {
    let content = content.strip_prefix('/')?;

    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.is_empty() {
        return Some(CommandResult::error("Invalid command"));
    }

    let command = parts[0].to_lowercase();
    let args = &parts[1..];

    Some(match command.as_str() {
        "help" => cmd_help(),
        "pos" => cmd_pos(gid, world),
        "changename" => cmd_change_name(gid, args, world, now),
        "changemap" => cmd_change_map(gid, args, world),
        "save" => cmd_save(gid, world),
        _ => CommandResult::error(format!("Unknown command: /{}", command)),
    })
}

fn cmd_help() -> CommandResult {
    let mut help = String::from("Available commands:\n");
    help.push_str("  /help - Show this help message\n");
    help.push_str("  /pos - Show your current position\n");
    help.push_str("  /changename <name> - Rename your character\n");
    help.push_str("  /changemap <map> [x y] - Travel to another map\n");
    help.push_str("  /save - Save your position (towns only)\n");
    CommandResult::success(help)
}

fn cmd_pos(gid: u64, world: &World) -> CommandResult {
    let Some(index) = world.locate(gid) else {
        return CommandResult::error("Player not found");
    };
    let map = &world.maps()[index];
    match map.get(gid) {
        Some(player) => CommandResult::success(format!(
            "Position: x={}, y={} on map {} ({})",
            player.x, player.y, map.name, map.id
        )),
        None => CommandResult::error("Player not found"),
    }
}

fn cmd_change_name(gid: u64, args: &[&str], world: &mut World, now: u64) -> CommandResult {
    let [name] = args else {
        return CommandResult::error("Usage: /changename <name>");
    };

    if !NAME_LENGTH.contains(&name.chars().count()) || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return CommandResult::error("Names must be 3 to 16 letters or digits");
    }
    if world.find_player(name).is_some_and(|p| p.gid != gid) {
        return CommandResult::error(format!("The name {} is already taken", name));
    }

    let Some(index) = world.locate(gid) else {
        return CommandResult::error("Player not found");
    };
    let Some(map) = world.map_mut(index) else {
        return CommandResult::error("Player not found");
    };
    let map_name = map.name.clone();
    let Some(player) = map.get_mut(gid) else {
        return CommandResult::error("Player not found");
    };

    let old = std::mem::replace(&mut player.name, name.to_string());
    let record = player.to_record(&map_name);
    if let Some(record) = record {
        world.persistence().save_player(record);
    }
    info!("{} ({}) is now called {}", old, gid, name);
    world.broadcast(&packets::system_chat(&format!("{} is now known as {}", old, name), now));
    CommandResult::success(format!("You are now called {}", name))
}

fn cmd_change_map(gid: u64, args: &[&str], world: &mut World) -> CommandResult {
    let (target, x, y) = match args {
        [target] => (*target, -1.0, -1.0),
        [target, x, y] => match (x.parse::<f32>(), y.parse::<f32>()) {
            (Ok(x), Ok(y)) if x.is_finite() && y.is_finite() => (*target, x, y),
            _ => return CommandResult::error("Coordinates must be numbers"),
        },
        _ => return CommandResult::error("Usage: /changemap <map> [x y]"),
    };

    if !world.entity(gid).is_some_and(|p| !p.is_dead()) {
        return CommandResult::error("You can't travel right now");
    }

    match world.join_map(gid, target, x, y) {
        Ok(()) => {
            let name = world
                .locate(gid)
                .map(|index| world.maps()[index].name.clone())
                .unwrap_or_default();
            CommandResult::success(format!("Welcome to {}", name))
        }
        Err(WorldError::MapNotFound(map)) => CommandResult::error(format!("Unknown map: {}", map)),
        Err(e) => {
            error!("/changemap {} failed for {}: {}", target, gid, e);
            CommandResult::error("Could not change map")
        }
    }
}

fn cmd_save(gid: u64, world: &mut World) -> CommandResult {
    let Some(index) = world.locate(gid) else {
        return CommandResult::error("Player not found");
    };
    let Some(map) = world.map_mut(index) else {
        return CommandResult::error("Player not found");
    };
    if !map.town {
        return CommandResult::error("you can only save position in towns");
    }
    let map_name = map.name.clone();
    let Some(player) = map.get_mut(gid) else {
        return CommandResult::error("Player not found");
    };
    let (x, y) = (player.x, player.y);
    let Some(data) = player.player_mut() else {
        return CommandResult::error("Player not found");
    };
    data.save_point = Some(SavePoint { map: map_name.clone(), x, y });

    if let Some(record) = player.to_record(&map_name) {
        world.persistence().save_player(record);
    }
    CommandResult::success(format!("Position saved: {} ({}, {})", map_name, x, y))
}
