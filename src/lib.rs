//! derp - an embeddable scripting-language VM
//!
//! This library provides a lexer, parser, and tree-walking evaluator
//! for the Derp scripting language, plus the `Vm` that owns compiled
//! programs' lifetime (allocation, garbage collection) end to end.

pub mod ast;
pub mod builtins;
pub mod config;
pub mod context;
pub mod errors;
pub mod eval;
pub mod parser;
pub mod pool;
pub mod value;
pub mod vm;

pub use config::VmOptions;
pub use errors::{ControlFlow, DerpError, ErrorState};
pub use parser::{parse, ParseException};
pub use value::{CustomData, NativeCallData, Ref, Value, ValueKind};
pub use vm::Vm;
