pub mod builder;
pub mod interp;
pub mod ir;
pub mod parser;
pub mod printer;
pub mod verifier;

pub use ir::{Module, ModuleStats};

/// Prefix reserved for the native runtime helpers; functions carrying it are
/// never transformed.
pub const RUNTIME_PREFIX: &str = "__obf_";
