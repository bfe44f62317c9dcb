//! Operator console: text commands driving the engine over the in-memory host.

use std::path::PathBuf;
use std::sync::Arc;

use decor_core::{load_mechanics, BlockFace, Engine, MemoryHost, PlacedObject, ViewerId, WorldId};
use decor_proto::types::{BlockPos, ChunkPos, Vec3};
use tracing::info;
use uuid::Uuid;

/// Result returned by a console command.
pub struct CommandResult {
    /// Whether the command executed successfully.
    pub success: bool,
    /// Lines to echo back to the operator.
    pub messages: Vec<String>,
    /// If true, the server should shut down.
    pub should_stop: bool,
}

impl CommandResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            messages: vec![message.into()],
            should_stop: false,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            messages: vec![message.into()],
            should_stop: false,
        }
    }
}

const HELP: &[(&str, &str)] = &[
    ("help", "List available commands"),
    ("place <type> <x> <y> <z> [yaw] [face]", "Place an object"),
    ("remove <id>", "Remove an object"),
    ("break <id>", "Remove an object and hand out its drops"),
    ("rotate <id> [degrees]", "Rotate by a step or by the given angle"),
    ("light <id> [on|off]", "Toggle an object's lights"),
    ("dye <id> <rrggbb|none>", "Set an object's dye colour"),
    ("viewer <x> <y> <z>", "Connect a viewer"),
    ("move <viewer> <x> <y> <z>", "Move a viewer"),
    ("disconnect <viewer>", "Disconnect a viewer"),
    ("track <id> <viewer>", "Start tracking an object's proxy"),
    ("untrack <id> <viewer>", "Stop tracking an object's proxy"),
    ("sit <id> <viewer>", "Mount an object's first seat"),
    ("stand <id> <viewer>", "Dismount an object's first seat"),
    ("owner <x> <y> <z>", "Show the object claiming a cell"),
    ("unload <cx> <cz>", "Unload a chunk region"),
    ("load", "Restore every persisted proxy not in memory"),
    ("reload", "Reload the mechanics file"),
    ("list", "List placed objects"),
    ("stop", "Retract everything and stop"),
];

pub struct Console {
    engine: Arc<Engine>,
    host: Arc<MemoryHost>,
    mechanics_path: PathBuf,
    world: WorldId,
}

impl Console {
    pub fn new(engine: Arc<Engine>, host: Arc<MemoryHost>, mechanics_path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            host,
            mechanics_path: mechanics_path.into(),
            world: WorldId(0),
        }
    }

    pub fn execute(&self, line: &str) -> CommandResult {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            return CommandResult::err("Empty command");
        };
        let args: Vec<&str> = parts.collect();
        let result = match name.to_ascii_lowercase().as_str() {
            "help" => Ok(self.help()),
            "place" => self.place(&args),
            "remove" => self.remove(&args, false),
            "break" => self.remove(&args, true),
            "rotate" => self.rotate(&args),
            "light" => self.light(&args),
            "dye" => self.dye(&args),
            "viewer" => self.viewer(&args),
            "move" => self.move_viewer(&args),
            "disconnect" => self.disconnect(&args),
            "track" => self.track(&args, true),
            "untrack" => self.track(&args, false),
            "sit" => self.seat(&args, true),
            "stand" => self.seat(&args, false),
            "owner" => self.owner(&args),
            "unload" => self.unload(&args),
            "load" => Ok(self.load()),
            "reload" => self.reload(),
            "list" => Ok(self.list()),
            "stop" => Ok(self.stop()),
            other => Err(format!("Unknown command: {other}. Type 'help' for a list.")),
        };
        result.unwrap_or_else(CommandResult::err)
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn help(&self) -> CommandResult {
        let mut messages = vec!["Available commands:".to_string()];
        for (usage, description) in HELP {
            messages.push(format!("  {usage} - {description}"));
        }
        CommandResult {
            success: true,
            messages,
            should_stop: false,
        }
    }

    fn place(&self, args: &[&str]) -> Result<CommandResult, String> {
        let [type_id, x, y, z, rest @ ..] = args else {
            return Err("Usage: place <type> <x> <y> <z> [yaw] [face]".into());
        };
        let cell = BlockPos::new(parse(x)?, parse(y)?, parse(z)?);
        let yaw = rest.first().map(|s| parse::<f32>(s)).transpose()?.unwrap_or(0.0);
        let face = match rest.get(1) {
            Some(s) => BlockFace::parse(s).ok_or_else(|| format!("Unknown face: {s}"))?,
            None => BlockFace::Up,
        };
        let object = self
            .engine
            .place(self.world, type_id, cell, yaw, face)
            .map_err(|e| format!("Cannot place '{type_id}': {e}"))?;
        Ok(CommandResult::ok(format!(
            "Placed {} as {} at {}",
            type_id, object.id, object.transform.position
        )))
    }

    fn remove(&self, args: &[&str], drops: bool) -> Result<CommandResult, String> {
        let [id] = args else {
            return Err("Usage: remove <id>".into());
        };
        let object = self.resolve(id)?;
        let removed = if drops {
            self.engine.remove_with_drops(&object.id.uuid)
        } else {
            self.engine.remove(&object.id.uuid)
        };
        if removed {
            Ok(CommandResult::ok(format!("Removed {}", object.id)))
        } else {
            Err(format!("{} was already removed", object.id))
        }
    }

    fn rotate(&self, args: &[&str]) -> Result<CommandResult, String> {
        let (id, delta) = match args {
            [id] => (*id, None),
            [id, degrees] => (*id, Some(parse::<f32>(degrees)?)),
            _ => return Err("Usage: rotate <id> [degrees]".into()),
        };
        let object = self.resolve(id)?;
        let rotated = match delta {
            Some(delta) => self.engine.rotate(&object.id.uuid, delta),
            None => self.engine.rotate_step(&object.id.uuid),
        }
        .map_err(|e| format!("Cannot rotate {}: {e}", object.id))?;
        Ok(CommandResult::ok(format!(
            "Rotated {} to yaw {}",
            rotated.id, rotated.transform.yaw
        )))
    }

    fn light(&self, args: &[&str]) -> Result<CommandResult, String> {
        let (id, on) = match args {
            [id] => (*id, None),
            [id, "on"] => (*id, Some(true)),
            [id, "off"] => (*id, Some(false)),
            _ => return Err("Usage: light <id> [on|off]".into()),
        };
        let object = self.resolve(id)?;
        let state = self
            .engine
            .toggle_light(&object.id.uuid, on)
            .map_err(|e| e.to_string())?;
        Ok(CommandResult::ok(format!(
            "Lights of {} are {}",
            object.id,
            if state { "on" } else { "off" }
        )))
    }

    fn dye(&self, args: &[&str]) -> Result<CommandResult, String> {
        let [id, color] = args else {
            return Err("Usage: dye <id> <rrggbb|none>".into());
        };
        let object = self.resolve(id)?;
        let color = match *color {
            "none" => None,
            hex => Some(
                u32::from_str_radix(hex.trim_start_matches('#'), 16)
                    .map_err(|_| format!("Invalid colour: {hex}"))?,
            ),
        };
        self.engine.set_dye(&object.id.uuid, color);
        Ok(CommandResult::ok(format!("Dyed {}", object.id)))
    }

    fn viewer(&self, args: &[&str]) -> Result<CommandResult, String> {
        let position = parse_vec3(args, "viewer <x> <y> <z>")?;
        let viewer = self.host.add_viewer(self.world, position);
        Ok(CommandResult::ok(format!("Connected {viewer} at {position}")))
    }

    fn move_viewer(&self, args: &[&str]) -> Result<CommandResult, String> {
        let [viewer, rest @ ..] = args else {
            return Err("Usage: move <viewer> <x> <y> <z>".into());
        };
        let viewer = ViewerId(parse(viewer)?);
        let position = parse_vec3(rest, "move <viewer> <x> <y> <z>")?;
        if self.host.move_viewer(viewer, position) {
            Ok(CommandResult::ok(format!("Moved {viewer} to {position}")))
        } else {
            Err(format!("No such viewer: {viewer}"))
        }
    }

    fn disconnect(&self, args: &[&str]) -> Result<CommandResult, String> {
        let [viewer] = args else {
            return Err("Usage: disconnect <viewer>".into());
        };
        let viewer = ViewerId(parse(viewer)?);
        if !self.host.remove_viewer(viewer) {
            return Err(format!("No such viewer: {viewer}"));
        }
        self.engine.viewer_disconnected(viewer);
        Ok(CommandResult::ok(format!("Disconnected {viewer}")))
    }

    fn track(&self, args: &[&str], start: bool) -> Result<CommandResult, String> {
        let [id, viewer] = args else {
            return Err("Usage: track <id> <viewer>".into());
        };
        let object = self.resolve(id)?;
        let viewer = ViewerId(parse(viewer)?);
        if start {
            self.engine.viewer_started_tracking(object.id.numeric, viewer);
            Ok(CommandResult::ok(format!("{viewer} now tracks {}", object.id)))
        } else {
            self.engine.viewer_stopped_tracking(object.id.numeric, viewer);
            Ok(CommandResult::ok(format!("{viewer} no longer tracks {}", object.id)))
        }
    }

    fn seat(&self, args: &[&str], mount: bool) -> Result<CommandResult, String> {
        let [id, viewer] = args else {
            return Err("Usage: sit <id> <viewer>".into());
        };
        let object = self.resolve(id)?;
        let viewer = ViewerId(parse(viewer)?);
        let seat = *object
            .dependents
            .seats
            .first()
            .ok_or_else(|| format!("{} has no seat", object.id))?;
        let done = if mount {
            self.engine.seat_mounted(seat, viewer)
        } else {
            self.engine.seat_dismounted(seat, viewer)
        };
        if done {
            Ok(CommandResult::ok(format!(
                "{viewer} {} {}",
                if mount { "sat on" } else { "stood up from" },
                object.id
            )))
        } else {
            Err(format!("Seat of {} is not registered", object.id))
        }
    }

    fn owner(&self, args: &[&str]) -> Result<CommandResult, String> {
        let [x, y, z] = args else {
            return Err("Usage: owner <x> <y> <z>".into());
        };
        let cell = BlockPos::new(parse(x)?, parse(y)?, parse(z)?);
        match self
            .engine
            .owner_at(self.world, cell)
            .and_then(|uuid| self.engine.get(&uuid))
        {
            Some(object) => Ok(CommandResult::ok(format!(
                "{} is claimed by {} ({})",
                cell, object.id, object.type_id
            ))),
            None => Ok(CommandResult::ok(format!("{cell} is unclaimed"))),
        }
    }

    fn unload(&self, args: &[&str]) -> Result<CommandResult, String> {
        let [cx, cz] = args else {
            return Err("Usage: unload <cx> <cz>".into());
        };
        let chunk = ChunkPos::new(parse(cx)?, parse(cz)?);
        let count = self.engine.region_unloaded(self.world, chunk);
        Ok(CommandResult::ok(format!("Unloaded {count} object(s) in {chunk}")))
    }

    fn load(&self) -> CommandResult {
        let mut restored = 0;
        let mut messages = Vec::new();
        for (numeric, persisted) in self.host.proxies_in(self.world) {
            if self.engine.get_by_numeric(numeric).is_some() {
                continue;
            }
            let uuid = persisted.uuid;
            match self.engine.restore(self.world, numeric, persisted) {
                Ok(_) => restored += 1,
                Err(e) => messages.push(format!("Cannot restore {uuid}: {e}")),
            }
        }
        messages.push(format!("Restored {restored} object(s)"));
        CommandResult {
            success: true,
            messages,
            should_stop: false,
        }
    }

    fn reload(&self) -> Result<CommandResult, String> {
        let mechanics = load_mechanics(&self.mechanics_path)
            .map_err(|e| format!("Reload failed: {e}"))?;
        let count = mechanics.len();
        let refreshed = self.engine.reload_catalog(mechanics);
        Ok(CommandResult::ok(format!(
            "Reloaded {count} mechanic(s), refreshed {refreshed} object(s)"
        )))
    }

    fn list(&self) -> CommandResult {
        let mut objects = self.engine.registry().all();
        objects.sort_by_key(|o| o.id.numeric);
        let mut messages = vec![format!("{} object(s) placed:", objects.len())];
        for object in objects {
            messages.push(format!(
                "  {} {} at {} yaw {}",
                object.id, object.type_id, object.transform.position, object.transform.yaw
            ));
        }
        CommandResult {
            success: true,
            messages,
            should_stop: false,
        }
    }

    fn stop(&self) -> CommandResult {
        let retracted = self.engine.retract_all();
        info!("Retracted {} packet(s) before shutdown", retracted);
        CommandResult {
            success: true,
            messages: vec!["Stopping...".into()],
            should_stop: true,
        }
    }

    /// Look an object up by numeric id or world-unique id.
    fn resolve(&self, arg: &str) -> Result<Arc<PlacedObject>, String> {
        let found = match arg.parse::<i64>() {
            Ok(numeric) => self.engine.get_by_numeric(numeric),
            Err(_) => Uuid::parse_str(arg)
                .ok()
                .and_then(|uuid| self.engine.get(&uuid)),
        };
        found.ok_or_else(|| format!("No such object: {arg}"))
    }
}

fn parse<T: std::str::FromStr>(s: &str) -> Result<T, String> {
    s.parse().map_err(|_| format!("Invalid number: {s}"))
}

fn parse_vec3(args: &[&str], usage: &str) -> Result<Vec3, String> {
    let [x, y, z] = args else {
        return Err(format!("Usage: {usage}"));
    };
    Ok(Vec3::new(parse(x)?, parse(y)?, parse(z)?))
}
