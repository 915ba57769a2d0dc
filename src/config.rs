//! Tunable limits for the lexer, parser, and evaluator.
//!
//! Mirrors the defaults baked into the original implementation. Hosts
//! that need different limits build a [`VmOptions`] instead of editing
//! these constants.

/// A single token's text must not exceed this many bytes.
pub const MAX_TOKEN_LENGTH: usize = 1024;

/// A string literal's contents must not exceed this many bytes.
pub const MAX_STRING_LITERAL_LENGTH: usize = 1024;

/// Total tokens produced for one source string.
pub const MAX_TOKEN_COUNT: usize = 65_536;

/// Recursive evaluator / function-call stack depth.
pub const MAX_STACK_FRAMES: usize = 65_536;

/// Live `Value` population ceiling, enforced before each evaluation step.
pub const MAX_OBJECT_COUNT: usize = u32::MAX as usize - 1;

/// Object count above which the threshold auto-GC policy starts collecting.
pub const GC_MIN_THRESHOLD: usize = 2048;

/// Parser recursion depth (nested parens/blocks/expressions), separate
/// from the evaluator's own stack-frame limit.
pub const MAX_PARSER_DEPTH: usize = 200;

/// Execution steps (one per `eval` node visited) a VM will run before
/// aborting with an error. The soft cancellation mechanism: decrements
/// on every step, independent of recursion depth, so a flat unbounded
/// loop is still bounded even though it never grows the call stack.
pub const MAX_EXECUTION_NODES: usize = 10_000_000;

/// Host-overridable knobs, passed to [`crate::vm::Vm::with_options`].
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub max_stack_frames: usize,
    pub max_object_count: usize,
    pub gc_min_threshold: usize,
    pub max_execution_nodes: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_stack_frames: MAX_STACK_FRAMES,
            max_object_count: MAX_OBJECT_COUNT,
            gc_min_threshold: GC_MIN_THRESHOLD,
            max_execution_nodes: MAX_EXECUTION_NODES,
        }
    }
}
