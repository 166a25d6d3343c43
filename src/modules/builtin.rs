/// `modules/builtin.rs` — modules bundled with the host
///
/// Served by `ModuleSourceCache` when the workspace has no file for the id.

pub const GRID: &str = r#"-- @module name: Grid
-- @module category: 2D
-- @module imports: ModuleBase, log, clamp

local Grid = ModuleBase:extend("Grid", {
  { name = "flash", options = { { name = "intensity", default = 1 } } },
  { name = "highlight", options = { { name = "cell", default = 1 } } },
})

function Grid:init(container)
  local m = container.matrix or {}
  self.rows = m.rows or 1
  self.cols = m.cols or 1
  self.intensity = 0
  self.active = 0
end

function Grid:flash(opts)
  self.intensity = clamp(tonumber(opts.intensity) or 1, 0, 1)
  log.info("grid " .. self.id .. " flash " .. self.intensity)
end

function Grid:highlight(opts)
  local cells = self.rows * self.cols
  self.active = clamp(math.floor(tonumber(opts.cell) or 1), 1, cells)
end

return Grid
"#;

pub const TEXT: &str = r#"-- @module name: Text
-- @module category: Text
-- @module imports: ModuleBase, log, randomInt

local Text = ModuleBase:extend("Text", {
  { name = "setText", options = { { name = "text", default = "" } } },
  { name = "shuffle", options = { { name = "words", default = {} } } },
})

function Text:init(container)
  self.text = ""
end

function Text:setText(opts)
  self.text = tostring(opts.text or "")
end

function Text:shuffle(opts)
  local words = opts.words or {}
  if #words > 0 then
    self.text = words[randomInt(1, #words)]
  end
  log.info("text " .. self.id .. " = " .. self.text)
end

return Text
"#;

pub const ORBIT: &str = r#"-- @module name: Orbit
-- @module category: 3D
-- @module imports: BaseSceneModule, random, lerp, assetUrl

local Orbit = BaseSceneModule:extend("Orbit", {
  { name = "spawn", options = { { name = "count", default = 1 } } },
  { name = "speed", options = { { name = "value", default = 1 } } },
})

function Orbit:init(container)
  BaseSceneModule.init(self, container)
  self.velocity = 1
  self.texture = assetUrl("textures/orbit.png")
end

function Orbit:spawn(opts)
  for _ = 1, (tonumber(opts.count) or 1) do
    self:add({ angle = random(0, 360) })
  end
end

function Orbit:speed(opts)
  self.velocity = lerp(self.velocity, tonumber(opts.value) or 1, 0.5)
end

return Orbit
"#;

pub fn source(module_id: &str) -> Option<&'static str> {
    match module_id {
        "Grid" => Some(GRID),
        "Text" => Some(TEXT),
        "Orbit" => Some(ORBIT),
        _ => None,
    }
}

pub fn ids() -> &'static [&'static str] {
    &["Grid", "Text", "Orbit"]
}
