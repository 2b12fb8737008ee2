//! Shared proc-macro attribute-parsing helpers used by both `simppl-codec-derive` (the `Type`
//! derive macro) and `simppl-macros` (the `#[interface]` attribute macro). Kept in its own crate
//! so neither macro crate needs to depend on the other.

pub mod macros;
