/// `sandbox/api.rs` — SDK helpers exposed to module code
///
/// Provides the helper surface a module can import:
///   log, random, randomInt, clamp, lerp, json, assetUrl
///
/// Helpers are collected in a per-session table; a module only receives
/// the entries it declared.
use std::sync::{Arc, Mutex};

use mlua::{Lua, Result as LuaResult, Table, Value};
use rand::Rng;

/// Asset base of the owning session, updated on every track init.
pub type AssetBase = Arc<Mutex<String>>;

pub fn build_sdk(lua: &Lua, assets: AssetBase) -> LuaResult<Table> {
    let sdk = lua.create_table()?;
    register_log(lua, &sdk)?;
    register_math(lua, &sdk)?;
    register_json(lua, &sdk)?;
    register_asset_url(lua, &sdk, assets)?;
    Ok(sdk)
}

// ── log ───────────────────────────────────────────────────────────────────────

fn register_log(lua: &Lua, sdk: &Table) -> LuaResult<()> {
    let log_tbl = lua.create_table()?;

    log_tbl.set("info", lua.create_function(|_, msg: String| {
        log::info!("[module] {}", msg);
        Ok(())
    })?)?;
    log_tbl.set("warn", lua.create_function(|_, msg: String| {
        log::warn!("[module] {}", msg);
        Ok(())
    })?)?;
    log_tbl.set("error", lua.create_function(|_, msg: String| {
        log::error!("[module] {}", msg);
        Ok(())
    })?)?;

    sdk.set("log", log_tbl)?;
    Ok(())
}

// ── random / clamp / lerp ─────────────────────────────────────────────────────

fn register_math(lua: &Lua, sdk: &Table) -> LuaResult<()> {
    // random(min?, max?): float in [min, max), defaults to [0, 1)
    sdk.set("random", lua.create_function(|_, (min, max): (Option<f64>, Option<f64>)| {
        let (mut lo, mut hi) = (min.unwrap_or(0.0), max.unwrap_or(1.0));
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        if lo == hi || !lo.is_finite() || !hi.is_finite() {
            return Ok(lo);
        }
        Ok(random_between(lo, hi))
    })?)?;

    // randomInt(min, max): inclusive
    sdk.set("randomInt", lua.create_function(|_, (min, max): (i64, i64)| {
        let (lo, hi) = if min > max { (max, min) } else { (min, max) };
        Ok(rand::thread_rng().gen_range(lo..=hi))
    })?)?;

    sdk.set("clamp", lua.create_function(|_, (v, lo, hi): (f64, f64, f64)| {
        Ok(clamp(v, lo, hi))
    })?)?;

    sdk.set("lerp", lua.create_function(|_, (a, b, t): (f64, f64, f64)| {
        Ok(a + (b - a) * t)
    })?)?;
    Ok(())
}

/// Uniform float in `[lo, hi)` for finite bounds with `lo < hi`.
fn random_between(lo: f64, hi: f64) -> f64 {
    let mut rng = rand::thread_rng();
    if (hi - lo).is_finite() {
        return rng.gen_range(lo..hi);
    }
    // The span overflows f64; interpolate instead of sampling the width.
    let t: f64 = rng.gen();
    lo * (1.0 - t) + hi * t
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if lo.is_nan() || hi.is_nan() || v.is_nan() {
        return v;
    }
    let (lo, hi) = if lo > hi { (hi, lo) } else { (lo, hi) };
    v.max(lo).min(hi)
}

// ── json ──────────────────────────────────────────────────────────────────────

fn register_json(lua: &Lua, sdk: &Table) -> LuaResult<()> {
    let tbl = lua.create_table()?;

    tbl.set("encode", lua.create_function(|_, val: Value| {
        serde_json::to_string(&lua_value_to_json(val))
            .map_err(|e| mlua::Error::runtime(format!("json.encode: {e}")))
    })?)?;
    tbl.set("decode", lua.create_function(|lua_ctx, text: String| {
        let parsed: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| mlua::Error::runtime(format!("json.decode: {e}")))?;
        json_to_lua_value(lua_ctx, &parsed)
    })?)?;

    sdk.set("json", tbl)?;
    Ok(())
}

// ── assetUrl ──────────────────────────────────────────────────────────────────

fn register_asset_url(lua: &Lua, sdk: &Table, assets: AssetBase) -> LuaResult<()> {
    sdk.set("assetUrl", lua.create_function(move |_, path: String| {
        let relative = path.trim_start_matches('/');
        if relative.split('/').any(|seg| seg == "..") {
            return Err(mlua::Error::runtime(format!(
                "assetUrl: '{path}' escapes the asset root"
            )));
        }
        let base = assets.lock().unwrap().clone();
        Ok(format!("{base}{relative}"))
    })?)?;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

pub fn lua_value_to_json(val: Value) -> serde_json::Value {
    match val {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(b),
        Value::Integer(i) => serde_json::json!(i),
        Value::Number(n) => serde_json::json!(n),
        Value::String(s) => serde_json::Value::String(s.to_string_lossy()),
        Value::Table(t) => {
            // Array heuristic: check if keys are sequential integers
            let pairs: Vec<_> = t.clone().pairs::<Value, Value>().filter_map(|p| p.ok()).collect();
            let is_array = pairs.iter().enumerate().all(|(i, (k, _))| {
                matches!(k, Value::Integer(n) if *n == (i as i64 + 1))
            });
            if is_array {
                serde_json::Value::Array(pairs.into_iter().map(|(_, v)| lua_value_to_json(v)).collect())
            } else {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs {
                    if let Value::String(ks) = k {
                        map.insert(ks.to_string_lossy(), lua_value_to_json(v));
                    }
                }
                serde_json::Value::Object(map)
            }
        }
        _ => serde_json::Value::Null,
    }
}

pub fn json_to_lua_value(lua: &Lua, val: &serde_json::Value) -> LuaResult<Value> {
    match val {
        serde_json::Value::Null => Ok(Value::Nil),
        serde_json::Value::Bool(b) => Ok(Value::Boolean(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else {
                Ok(Value::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::String(lua.create_string(s.as_str())?)),
        serde_json::Value::Array(arr) => {
            let t = lua.create_table()?;
            for (i, v) in arr.iter().enumerate() {
                t.set(i + 1, json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
        serde_json::Value::Object(obj) => {
            let t = lua.create_table()?;
            for (k, v) in obj {
                t.set(k.as_str(), json_to_lua_value(lua, v)?)?;
            }
            Ok(Value::Table(t))
        }
    }
}
