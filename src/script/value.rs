//! Deep conversion between Lua values and the JSON persistence representation.
//!
//! The storable value model is nil, boolean, number, string, and nested
//! tables (as sequences or string-keyed maps). Functions, userdata, threads
//! and non-finite numbers are rejected with a descriptive message so callers
//! can degrade to a warning instead of crashing.

use mlua::{Lua, Table, Value};
use serde_json::{Map, Number, Value as JsonValue};

/// Nesting limit for conversions. Also breaks cycles through tables.
const MAX_DEPTH: usize = 16;

/// Convert a Lua value into its JSON persistence form.
pub fn lua_to_json(value: &Value) -> Result<JsonValue, String> {
    lua_to_json_at(value, 0)
}

fn lua_to_json_at(value: &Value, depth: usize) -> Result<JsonValue, String> {
    if depth > MAX_DEPTH {
        return Err(format!("value nesting exceeds {MAX_DEPTH} levels"));
    }

    match value {
        Value::Nil => Ok(JsonValue::Null),
        Value::Boolean(b) => Ok(JsonValue::Bool(*b)),
        Value::Integer(i) => Ok(JsonValue::Number(Number::from(*i))),
        Value::Number(n) => Number::from_f64(*n)
            .map(JsonValue::Number)
            .ok_or_else(|| "non-finite number is not storable".to_string()),
        Value::String(s) => s
            .to_str()
            .map(|s| JsonValue::String(s.to_string()))
            .map_err(|_| "string is not valid UTF-8".to_string()),
        Value::Table(t) => table_to_json(t, depth),
        other => Err(format!("{} is not storable", other.type_name())),
    }
}

fn table_to_json(table: &Table, depth: usize) -> Result<JsonValue, String> {
    let mut entries: Vec<(Value, Value)> = Vec::new();
    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair.map_err(|e| format!("table iteration failed: {e}"))?;
        entries.push((key, value));
    }

    // A table whose keys are exactly 1..=len is stored as a sequence.
    let len = entries.len() as i64;
    let is_sequence = !entries.is_empty()
        && entries
            .iter()
            .all(|(k, _)| matches!(k, Value::Integer(i) if *i >= 1 && *i <= len));

    if is_sequence {
        let mut items = vec![JsonValue::Null; entries.len()];
        for (key, value) in &entries {
            if let Value::Integer(i) = key {
                items[(*i - 1) as usize] = lua_to_json_at(value, depth + 1)?;
            }
        }
        return Ok(JsonValue::Array(items));
    }

    // Empty tables are stored as empty sequences.
    if entries.is_empty() {
        return Ok(JsonValue::Array(Vec::new()));
    }

    let mut map = Map::new();
    for (key, value) in &entries {
        let key = match key {
            Value::String(s) => s
                .to_str()
                .map(|s| s.to_string())
                .map_err(|_| "table key is not valid UTF-8".to_string())?,
            Value::Integer(i) => i.to_string(),
            other => return Err(format!("{} is not a storable table key", other.type_name())),
        };
        map.insert(key, lua_to_json_at(value, depth + 1)?);
    }
    Ok(JsonValue::Object(map))
}

/// Convert a JSON persistence value back into a Lua value.
pub fn json_to_lua(lua: &Lua, value: &JsonValue) -> mlua::Result<Value> {
    match value {
        JsonValue::Null => Ok(Value::Nil),
        JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        JsonValue::String(s) => Ok(Value::String(lua.create_string(s)?)),
        JsonValue::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        JsonValue::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(lua: &Lua, source: &str) -> Value {
        lua.load(source).eval().unwrap()
    }

    #[test]
    fn test_scalars_to_json() {
        let lua = Lua::new();

        assert_eq!(lua_to_json(&Value::Nil).unwrap(), JsonValue::Null);
        assert_eq!(lua_to_json(&Value::Boolean(true)).unwrap(), json!(true));
        assert_eq!(lua_to_json(&Value::Integer(42)).unwrap(), json!(42));
        assert_eq!(lua_to_json(&Value::Number(1.5)).unwrap(), json!(1.5));

        let s = eval(&lua, r#"return "hello""#);
        assert_eq!(lua_to_json(&s).unwrap(), json!("hello"));
    }

    #[test]
    fn test_sequence_to_json() {
        let lua = Lua::new();
        let value = eval(&lua, "return {10, 20, 30}");

        assert_eq!(lua_to_json(&value).unwrap(), json!([10, 20, 30]));
    }

    #[test]
    fn test_map_to_json() {
        let lua = Lua::new();
        let value = eval(&lua, r#"return {score = 100, name = "kit"}"#);

        assert_eq!(
            lua_to_json(&value).unwrap(),
            json!({"score": 100, "name": "kit"})
        );
    }

    #[test]
    fn test_nested_to_json() {
        let lua = Lua::new();
        let value = eval(&lua, r#"return {tags = {"a", "b"}, meta = {depth = 2}}"#);

        assert_eq!(
            lua_to_json(&value).unwrap(),
            json!({"tags": ["a", "b"], "meta": {"depth": 2}})
        );
    }

    #[test]
    fn test_empty_table_is_sequence() {
        let lua = Lua::new();
        let value = eval(&lua, "return {}");

        assert_eq!(lua_to_json(&value).unwrap(), json!([]));
    }

    #[test]
    fn test_integer_keys_become_map_keys_when_sparse() {
        let lua = Lua::new();
        let value = eval(&lua, "return {[1] = 'a', [5] = 'b'}");

        // Sparse integer keys fall back to a string-keyed map
        assert_eq!(lua_to_json(&value).unwrap(), json!({"1": "a", "5": "b"}));
    }

    #[test]
    fn test_function_rejected() {
        let lua = Lua::new();
        let value = eval(&lua, "return function() end");

        let err = lua_to_json(&value).unwrap_err();
        assert!(err.contains("function"));
    }

    #[test]
    fn test_nested_function_rejected() {
        let lua = Lua::new();
        let value = eval(&lua, "return {cb = function() end}");

        assert!(lua_to_json(&value).is_err());
    }

    #[test]
    fn test_non_finite_number_rejected() {
        assert!(lua_to_json(&Value::Number(f64::INFINITY)).is_err());
        assert!(lua_to_json(&Value::Number(f64::NAN)).is_err());
    }

    #[test]
    fn test_boolean_key_rejected() {
        let lua = Lua::new();
        let value = eval(&lua, "return {[true] = 1}");

        assert!(lua_to_json(&value).is_err());
    }

    #[test]
    fn test_cycle_rejected() {
        let lua = Lua::new();
        let value = eval(&lua, "local t = {} t.me = t return t");

        let err = lua_to_json(&value).unwrap_err();
        assert!(err.contains("nesting"));
    }

    #[test]
    fn test_json_to_lua_scalars() {
        let lua = Lua::new();

        assert!(matches!(json_to_lua(&lua, &json!(null)).unwrap(), Value::Nil));
        assert!(matches!(
            json_to_lua(&lua, &json!(false)).unwrap(),
            Value::Boolean(false)
        ));
        assert!(matches!(
            json_to_lua(&lua, &json!(7)).unwrap(),
            Value::Integer(7)
        ));
        assert!(matches!(
            json_to_lua(&lua, &json!(2.5)).unwrap(),
            Value::Number(n) if n == 2.5
        ));
    }

    #[test]
    fn test_roundtrip_nested() {
        let lua = Lua::new();
        let original = json!({"items": ["sword", "shield"], "hp": 40, "alive": true});

        let lua_value = json_to_lua(&lua, &original).unwrap();
        let back = lua_to_json(&lua_value).unwrap();

        assert_eq!(back, original);
    }

    #[test]
    fn test_json_array_to_lua_sequence() {
        let lua = Lua::new();
        let value = json_to_lua(&lua, &json!([1, 2, 3])).unwrap();

        let Value::Table(table) = value else {
            panic!("expected table");
        };
        assert_eq!(table.get::<i64>(1).unwrap(), 1);
        assert_eq!(table.get::<i64>(3).unwrap(), 3);
    }
}
