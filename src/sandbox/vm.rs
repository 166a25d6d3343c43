/// `sandbox/vm.rs` — restricted Lua VMs for module code
///
/// Each session gets its own VM with only `table`, `string` and `math`
/// loaded and a memory ceiling. Module chunks never see the VM globals:
/// they run in an environment built from `SAFE_BASE`, the std tables and
/// their declared imports.
use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table, Value};

/// Base-library functions a module may use. `load`, `dofile`, `print`,
/// `collectgarbage` and friends stay out.
pub const SAFE_BASE: &[&str] = &[
    "assert",
    "error",
    "getmetatable",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "rawequal",
    "rawget",
    "rawlen",
    "rawset",
    "select",
    "setmetatable",
    "tonumber",
    "tostring",
    "type",
    "xpcall",
];

pub const STD_TABLES: &[&str] = &["math", "string", "table"];

/// Runtime classes every module can extend (when declared).
pub const RUNTIME_PRELUDE: &str = r#"
local ModuleBase = {}
ModuleBase.__index = ModuleBase
ModuleBase.name = "ModuleBase"
ModuleBase.methods = {
  { name = "matrix", options = {
      { name = "rows", default = 1 },
      { name = "cols", default = 1 },
      { name = "excludedCells", default = {} },
  } },
  { name = "show", options = {} },
  { name = "hide", options = {} },
  { name = "offset", options = { { name = "x", default = 0 }, { name = "y", default = 0 } } },
  { name = "scale", options = { { name = "scale", default = 1 } } },
  { name = "opacity", options = { { name = "opacity", default = 1 } } },
}

function ModuleBase:extend(name, methods)
  local cls = setmetatable({}, self)
  cls.__index = cls
  cls.super = self
  cls.name = name
  local all = {}
  for _, m in ipairs(self.methods) do all[#all + 1] = m end
  for _, m in ipairs(methods or {}) do all[#all + 1] = m end
  cls.methods = all
  return cls
end

function ModuleBase:new(container)
  local instance = setmetatable({}, self)
  instance.id = container.id
  instance.container = container
  instance.visible = true
  instance.x, instance.y = 0, 0
  instance.scaleFactor = 1
  instance.alpha = 1
  instance:init(container)
  return instance
end

function ModuleBase:init(container) end
function ModuleBase:show() self.visible = true end
function ModuleBase:hide() self.visible = false end
function ModuleBase:offset(opts)
  self.x = tonumber(opts.x) or 0
  self.y = tonumber(opts.y) or 0
end
function ModuleBase:scale(opts) self.scaleFactor = tonumber(opts.scale) or 1 end
function ModuleBase:opacity(opts) self.alpha = tonumber(opts.opacity) or 1 end
function ModuleBase:destroy() self.destroyed = true end

local BaseSceneModule = ModuleBase:extend("BaseSceneModule", {
  { name = "clearScene", options = {} },
})
function BaseSceneModule:init(container) self.objects = {} end
function BaseSceneModule:add(obj)
  self.objects[#self.objects + 1] = obj
  return obj
end
function BaseSceneModule:clearScene() self.objects = {} end
function BaseSceneModule:destroy()
  self.objects = {}
  ModuleBase.destroy(self)
end

return { ModuleBase = ModuleBase, BaseSceneModule = BaseSceneModule }
"#;

/// Creates a new Lua VM with sandbox restrictions applied.
pub fn create_sandboxed_vm(memory_limit: usize) -> LuaResult<Lua> {
    let lua = Lua::new_with(
        StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;
    lua.set_memory_limit(memory_limit)?;
    Ok(lua)
}

/// Fresh environment with the safe base functions and std tables.
pub fn base_environment(lua: &Lua) -> LuaResult<Table> {
    let env = lua.create_table()?;
    let globals = lua.globals();
    for name in SAFE_BASE.iter().chain(STD_TABLES.iter()) {
        let value: Value = globals.get(*name)?;
        env.set(*name, value)?;
    }
    Ok(env)
}

/// Evaluates the runtime prelude and returns its class table.
pub fn load_runtime_classes(lua: &Lua) -> LuaResult<Table> {
    let env = base_environment(lua)?;
    lua.load(RUNTIME_PRELUDE)
        .set_name("=prelude")
        .set_environment(env)
        .eval()
}
