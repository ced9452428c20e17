//! Host capability tables bound into every script VM.
//!
//! Scripts see a fixed hierarchy of globals: `time`, `position`, `item`,
//! `player`, `world`, `inventory`, `debug`, `data`, `task` and `module`
//! (Lua's own `math`/`string`/`table` libraries stay available from the
//! sandboxed stdlib). Two rules hold for every bound function:
//!
//! 1. Arguments are validated defensively; a bad call yields nil or false
//!    plus a logged warning, never an uncaught host-side error.
//! 2. Host data crosses the boundary as a copy. Snapshots are rebuilt as
//!    fresh Lua tables on every call, so a script can never hold a live or
//!    stale reference into host internals.

use std::sync::Arc;
use std::time::Instant;

use mlua::{Lua, LuaSerdeExt, Table, Value};
use rand::Rng;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use super::store::DataStore;
use super::value::{json_to_lua, lua_to_json};
use crate::host::snapshot::Vec3;
use crate::host::{ModuleSink, ModuleSpec, SnapshotHub, TaskRequest, TaskSink};

/// Everything a script VM needs from the host, shareable across worker
/// threads. Cloned once per spawned context.
#[derive(Clone)]
pub struct ApiBindings {
    /// Name of the owning script; scopes `data.*` and request queues.
    pub script: String,
    /// Persistent key/value store.
    pub store: Arc<DataStore>,
    /// Read-only host snapshots.
    pub snapshots: Arc<SnapshotHub>,
    /// Task request queue.
    pub tasks: Arc<TaskSink>,
    /// Menu module registry.
    pub modules: Arc<ModuleSink>,
}

/// Build and install every API table into a VM's globals.
pub fn bind_api(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<()> {
    let globals = lua.globals();

    extend_math_table(lua)?;
    globals.set("time", time_table(lua)?)?;
    globals.set("position", position_table(lua)?)?;
    globals.set("item", item_table(lua)?)?;
    globals.set("player", player_table(lua, bindings)?)?;
    globals.set("world", world_table(lua, bindings)?)?;
    globals.set("inventory", inventory_table(lua, bindings)?)?;
    globals.set("debug", debug_table(lua, bindings)?)?;
    globals.set("data", data_table(lua, bindings)?)?;
    globals.set("task", task_table(lua, bindings)?)?;
    globals.set("module", module_table(lua, bindings)?)?;

    Ok(())
}

/// Add host-seeded helpers to the sandboxed stdlib `math` table.
fn extend_math_table(lua: &Lua) -> mlua::Result<()> {
    let math: Table = lua.globals().get("math")?;

    // math.random_int(min, max) - inclusive, nil on a bad range
    math.set(
        "random_int",
        lua.create_function(|_, (min, max): (i64, i64)| {
            if min > max {
                return Ok(None);
            }
            let mut rng = rand::rng();
            Ok(Some(rng.random_range(min..=max)))
        })?,
    )?;

    Ok(())
}

fn time_table(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    // time.now_ms() - epoch milliseconds
    table.set(
        "now_ms",
        lua.create_function(|_, ()| Ok(chrono::Utc::now().timestamp_millis()))?,
    )?;

    // time.clock() - seconds since this context was created
    let started = Instant::now();
    table.set(
        "clock",
        lua.create_function(move |_, ()| Ok(started.elapsed().as_secs_f64()))?,
    )?;

    // time.date() - current date as YYYY-MM-DD
    table.set(
        "date",
        lua.create_function(|_, ()| Ok(chrono::Local::now().format("%Y-%m-%d").to_string()))?,
    )?;

    // time.time() - current time as HH:MM:SS
    table.set(
        "time",
        lua.create_function(|_, ()| Ok(chrono::Local::now().format("%H:%M:%S").to_string()))?,
    )?;

    Ok(table)
}

/// Read a `{x, y, z}` table defensively.
fn table_to_vec3(value: &Value) -> Option<Vec3> {
    let Value::Table(table) = value else {
        return None;
    };
    let x = table.get::<Option<f64>>("x").ok().flatten()?;
    let y = table.get::<Option<f64>>("y").ok().flatten()?;
    let z = table.get::<Option<f64>>("z").ok().flatten()?;
    Some(Vec3::new(x, y, z))
}

fn vec3_to_table(lua: &Lua, v: Vec3) -> mlua::Result<Table> {
    let table = lua.create_table()?;
    table.set("x", v.x)?;
    table.set("y", v.y)?;
    table.set("z", v.z)?;
    Ok(table)
}

fn position_table(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    // position.new(x, y, z)
    table.set(
        "new",
        lua.create_function(|lua, (x, y, z): (f64, f64, f64)| vec3_to_table(lua, Vec3::new(x, y, z)))?,
    )?;

    // position.distance(a, b) - nil on malformed arguments
    table.set(
        "distance",
        lua.create_function(|_, (a, b): (Value, Value)| {
            match (table_to_vec3(&a), table_to_vec3(&b)) {
                (Some(a), Some(b)) => Ok(Some(a.distance(&b))),
                _ => Ok(None),
            }
        })?,
    )?;

    // position.offset(p, dx, dy, dz)
    table.set(
        "offset",
        lua.create_function(|lua, (p, dx, dy, dz): (Value, f64, f64, f64)| {
            match table_to_vec3(&p) {
                Some(p) => Ok(Value::Table(vec3_to_table(
                    lua,
                    Vec3::new(p.x + dx, p.y + dy, p.z + dz),
                )?)),
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    Ok(table)
}

fn item_table(lua: &Lua) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    // item.make(id, count) - count defaults to 1
    table.set(
        "make",
        lua.create_function(|lua, (id, count): (Value, Option<i64>)| {
            let Value::String(id) = id else {
                return Ok(Value::Nil);
            };
            let table = lua.create_table()?;
            table.set("id", id)?;
            table.set("count", count.unwrap_or(1).max(0))?;
            Ok(Value::Table(table))
        })?,
    )?;

    // item.equals(a, b) - compares by id
    table.set(
        "equals",
        lua.create_function(|_, (a, b): (Value, Value)| {
            let id_of = |v: &Value| -> Option<String> {
                let Value::Table(t) = v else { return None };
                t.get::<Option<String>>("id").ok().flatten()
            };
            match (id_of(&a), id_of(&b)) {
                (Some(a), Some(b)) => Ok(a == b),
                _ => Ok(false),
            }
        })?,
    )?;

    Ok(table)
}

/// Serialize a host value into a fresh Lua table, degrading to nil with a
/// warning instead of raising.
fn snapshot_to_lua<T: serde::Serialize>(lua: &Lua, script: &str, value: &T) -> Value {
    match lua.to_value(value) {
        Ok(value) => value,
        Err(e) => {
            warn!(script, "snapshot conversion failed: {e}");
            Value::Nil
        }
    }
}

fn player_table(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    let (hub, script) = (Arc::clone(&bindings.snapshots), bindings.script.clone());
    table.set(
        "snapshot",
        lua.create_function(move |lua, ()| Ok(snapshot_to_lua(lua, &script, &hub.player())))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "name",
        lua.create_function(move |_, ()| Ok(hub.player().name))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "health",
        lua.create_function(move |_, ()| Ok(hub.player().health))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "max_health",
        lua.create_function(move |_, ()| Ok(hub.player().max_health))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "energy",
        lua.create_function(move |_, ()| Ok(hub.player().energy))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "level",
        lua.create_function(move |_, ()| Ok(hub.player().level))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "position",
        lua.create_function(move |lua, ()| vec3_to_table(lua, hub.player().position))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "is_moving",
        lua.create_function(move |_, ()| Ok(hub.player().moving))?,
    )?;

    Ok(table)
}

fn world_table(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    let (hub, script) = (Arc::clone(&bindings.snapshots), bindings.script.clone());
    table.set(
        "snapshot",
        lua.create_function(move |lua, ()| Ok(snapshot_to_lua(lua, &script, &hub.world())))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "tick",
        lua.create_function(move |_, ()| Ok(hub.world().tick))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "time_of_day",
        lua.create_function(move |_, ()| Ok(hub.world().time_of_day))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "is_day",
        lua.create_function(move |_, ()| Ok(hub.world().is_day()))?,
    )?;

    // world.nearby(radius) - entities within radius of the player; all
    // entities when radius is omitted. Negative radius yields an empty list.
    let (hub, script) = (Arc::clone(&bindings.snapshots), bindings.script.clone());
    table.set(
        "nearby",
        lua.create_function(move |lua, radius: Option<f64>| {
            let origin = hub.player().position;
            let result = lua.create_table()?;
            let mut index = 1;
            for entity in hub.world().entities {
                let within = match radius {
                    Some(r) => entity.position.distance(&origin) <= r,
                    None => true,
                };
                if within {
                    result.set(index, snapshot_to_lua(lua, &script, &entity))?;
                    index += 1;
                }
            }
            Ok(result)
        })?,
    )?;

    Ok(table)
}

fn inventory_table(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    let (hub, script) = (Arc::clone(&bindings.snapshots), bindings.script.clone());
    table.set(
        "snapshot",
        lua.create_function(move |lua, ()| Ok(snapshot_to_lua(lua, &script, &hub.inventory())))?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "count",
        lua.create_function(move |_, id: Value| {
            let Value::String(id) = id else { return Ok(0) };
            let Ok(id) = id.to_str().map(|s| s.to_string()) else {
                return Ok(0);
            };
            Ok(hub.inventory().count_of(&id) as i64)
        })?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "contains",
        lua.create_function(move |_, id: Value| {
            let Value::String(id) = id else {
                return Ok(false);
            };
            let Ok(id) = id.to_str().map(|s| s.to_string()) else {
                return Ok(false);
            };
            Ok(hub.inventory().count_of(&id) > 0)
        })?,
    )?;

    let hub = Arc::clone(&bindings.snapshots);
    table.set(
        "free_slots",
        lua.create_function(move |_, ()| Ok(hub.inventory().free_slots()))?,
    )?;

    // inventory.find(name) - first stack matching by id or display name
    let (hub, script) = (Arc::clone(&bindings.snapshots), bindings.script.clone());
    table.set(
        "find",
        lua.create_function(move |lua, name: Value| {
            let Value::String(name) = name else {
                return Ok(Value::Nil);
            };
            let Ok(name) = name.to_str().map(|s| s.to_string()) else {
                return Ok(Value::Nil);
            };
            let found = hub
                .inventory()
                .items
                .into_iter()
                .find(|i| i.id == name || i.name == name);
            Ok(match found {
                Some(item) => snapshot_to_lua(lua, &script, &item),
                None => Value::Nil,
            })
        })?,
    )?;

    Ok(table)
}

fn debug_table(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    let script = bindings.script.clone();
    table.set(
        "log",
        lua.create_function(move |_, value: Value| {
            info!(script = %script, "{}", value_to_string(&value));
            Ok(())
        })?,
    )?;

    let script = bindings.script.clone();
    table.set(
        "warn",
        lua.create_function(move |_, value: Value| {
            warn!(script = %script, "{}", value_to_string(&value));
            Ok(())
        })?,
    )?;

    Ok(table)
}

fn data_table(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    // data.store(key, value) -> bool
    let (store, script) = (Arc::clone(&bindings.store), bindings.script.clone());
    table.set(
        "store",
        lua.create_function(move |_, (key, value): (Value, Value)| {
            let Some(key) = value_to_key(&key) else {
                warn!(script = %script, "data.store: key must be a string");
                return Ok(false);
            };
            let json = match lua_to_json(&value) {
                Ok(json) => json,
                Err(e) => {
                    warn!(script = %script, key, "data.store: {e}");
                    return Ok(false);
                }
            };
            match store.store(&script, &key, json) {
                Ok(()) => Ok(true),
                Err(e) => {
                    warn!(script = %script, key, "data.store: {e}");
                    Ok(false)
                }
            }
        })?,
    )?;

    // data.retrieve(key) -> value | nil
    let (store, script) = (Arc::clone(&bindings.store), bindings.script.clone());
    table.set(
        "retrieve",
        lua.create_function(move |lua, key: Value| {
            let Some(key) = value_to_key(&key) else {
                return Ok(Value::Nil);
            };
            match store.retrieve(&script, &key) {
                Some(json) => match json_to_lua(lua, &json) {
                    Ok(value) => Ok(value),
                    Err(e) => {
                        warn!(script = %script, key, "data.retrieve: {e}");
                        Ok(Value::Nil)
                    }
                },
                None => Ok(Value::Nil),
            }
        })?,
    )?;

    // data.exists(key) -> bool
    let (store, script) = (Arc::clone(&bindings.store), bindings.script.clone());
    table.set(
        "exists",
        lua.create_function(move |_, key: Value| {
            let Some(key) = value_to_key(&key) else {
                return Ok(false);
            };
            Ok(store.exists(&script, &key))
        })?,
    )?;

    // data.remove(key) -> previous value | nil
    let (store, script) = (Arc::clone(&bindings.store), bindings.script.clone());
    table.set(
        "remove",
        lua.create_function(move |lua, key: Value| {
            let Some(key) = value_to_key(&key) else {
                return Ok(Value::Nil);
            };
            match store.remove(&script, &key) {
                Ok(Some(json)) => Ok(json_to_lua(lua, &json).unwrap_or(Value::Nil)),
                Ok(None) => Ok(Value::Nil),
                Err(e) => {
                    warn!(script = %script, key, "data.remove: {e}");
                    Ok(Value::Nil)
                }
            }
        })?,
    )?;

    // data.keys() -> sequence of strings
    let (store, script) = (Arc::clone(&bindings.store), bindings.script.clone());
    table.set(
        "keys",
        lua.create_function(move |lua, ()| {
            let result = lua.create_table()?;
            for (i, key) in store.keys(&script).into_iter().enumerate() {
                result.set(i + 1, key)?;
            }
            Ok(result)
        })?,
    )?;

    // data.clear() -> number of entries removed
    let (store, script) = (Arc::clone(&bindings.store), bindings.script.clone());
    table.set(
        "clear",
        lua.create_function(move |_, ()| match store.clear(&script) {
            Ok(removed) => Ok(removed as i64),
            Err(e) => {
                warn!(script = %script, "data.clear: {e}");
                Ok(0)
            }
        })?,
    )?;

    Ok(table)
}

fn task_table(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    // task.create{name = ..., kind = ..., priority = ..., params = {...}}
    let (sink, script) = (Arc::clone(&bindings.tasks), bindings.script.clone());
    table.set(
        "create",
        lua.create_function(move |_, spec: Value| {
            let Value::Table(spec) = spec else {
                warn!(script = %script, "task.create: expected a table");
                return Ok(false);
            };

            let name = spec.get::<Option<String>>("name").ok().flatten();
            let Some(name) = name.filter(|n| !n.is_empty()) else {
                warn!(script = %script, "task.create: 'name' is required");
                return Ok(false);
            };

            let kind = spec
                .get::<Option<String>>("kind")
                .ok()
                .flatten()
                .unwrap_or_else(|| "custom".to_string());
            let priority = spec.get::<Option<i64>>("priority").ok().flatten().unwrap_or(0);
            let params = match spec.get::<Value>("params") {
                Ok(Value::Nil) => JsonValue::Null,
                Ok(value) => lua_to_json(&value).unwrap_or_else(|e| {
                    warn!(script = %script, task = %name, "task.create params dropped: {e}");
                    JsonValue::Null
                }),
                Err(_) => JsonValue::Null,
            };

            sink.push(TaskRequest {
                script: script.clone(),
                name,
                kind,
                priority,
                params,
                requested_at: chrono::Utc::now(),
            });
            Ok(true)
        })?,
    )?;

    Ok(table)
}

fn module_table(lua: &Lua, bindings: &ApiBindings) -> mlua::Result<Table> {
    let table = lua.create_table()?;

    // module.register{name = ..., title = ..., category = ...}
    let (sink, script) = (Arc::clone(&bindings.modules), bindings.script.clone());
    table.set(
        "register",
        lua.create_function(move |_, spec: Value| {
            let Value::Table(spec) = spec else {
                warn!(script = %script, "module.register: expected a table");
                return Ok(false);
            };

            let name = spec.get::<Option<String>>("name").ok().flatten();
            let Some(name) = name.filter(|n| !n.is_empty()) else {
                warn!(script = %script, "module.register: 'name' is required");
                return Ok(false);
            };

            let title = spec
                .get::<Option<String>>("title")
                .ok()
                .flatten()
                .unwrap_or_else(|| name.clone());
            let category = spec
                .get::<Option<String>>("category")
                .ok()
                .flatten()
                .unwrap_or_else(|| "scripts".to_string());

            Ok(sink.register(ModuleSpec {
                script: script.clone(),
                name,
                title,
                category,
            }))
        })?,
    )?;

    Ok(table)
}

fn value_to_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => s.to_str().map(|s| s.to_string()).ok(),
        _ => None,
    }
}

/// Convert a Lua value to a string for log output.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_str().map(|s| s.to_string()).unwrap_or_default(),
        Value::Table(_) => "[table]".to_string(),
        Value::Function(_) => "[function]".to_string(),
        Value::Thread(_) => "[thread]".to_string(),
        Value::UserData(_) => "[userdata]".to_string(),
        Value::LightUserData(_) => "[lightuserdata]".to_string(),
        Value::Error(e) => format!("[error: {e}]"),
        _ => "[unknown]".to_string(),
    }
}
