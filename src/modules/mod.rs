/// `modules/` — module sources, capability gate and introspection
pub mod builtin;
pub mod capability;
pub mod introspect;
pub mod manifest;
pub mod source;
