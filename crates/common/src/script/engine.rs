use rhai::module_resolvers::DummyModuleResolver;
use rhai::{Dynamic, Engine};
use std::time::Instant;
use tracing::debug;

/// Resource ceilings applied to every sandbox engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    /// 0 disables the operation count limit; the wall-clock budget still applies
    pub max_operations: u64,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_call_levels: 32,
            max_expr_depth: 64,
            max_function_expr_depth: 32,
            max_string_size: 64 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
            max_operations: 0,
        }
    }
}

// Checked once every 1024 operations.
const DEADLINE_CHECK_MASK: u64 = 0x3FF;

/// Engine with no module loading, no `eval`, and printing routed to tracing
pub fn create_sandbox_engine(limits: &SandboxLimits) -> Engine {
    let mut engine = Engine::new();

    engine
        .set_max_call_levels(limits.max_call_levels)
        .set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth)
        .set_max_string_size(limits.max_string_size)
        .set_max_array_size(limits.max_array_size)
        .set_max_map_size(limits.max_map_size)
        .set_max_operations(limits.max_operations)
        .set_module_resolver(DummyModuleResolver::new());

    engine.disable_symbol("eval");

    engine.on_print(|text| debug!(script_output = %text, "Script print"));
    engine.on_debug(|text, _source, pos| {
        debug!(script_output = %text, position = %pos, "Script debug")
    });

    engine
}

/// Like [`create_sandbox_engine`], but terminates any run still going at `deadline`
pub fn create_deadline_engine(limits: &SandboxLimits, deadline: Instant) -> Engine {
    let mut engine = create_sandbox_engine(limits);

    engine.on_progress(move |ops| {
        if ops & DEADLINE_CHECK_MASK == 0 && Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    engine
}
