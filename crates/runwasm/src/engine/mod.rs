use wasmparser::{Validator, WasmFeatures};

/// Default maximum wasm call depth before trapping with
/// "call stack exhausted".
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;

/// Execution limits shared by every instance created from an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Instruction budget per top-level call. `None` runs unbounded.
    pub fuel: Option<u64>,
    /// Maximum nesting of wasm-to-wasm calls.
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fuel: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

/// Shared compilation configuration.
pub struct Engine {
    features: WasmFeatures,
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        // Proposals the interpreter has no execution support for are
        // rejected at validation time rather than at the first bad op.
        let mut features = WasmFeatures::default();
        features.remove(
            WasmFeatures::SIMD
                | WasmFeatures::RELAXED_SIMD
                | WasmFeatures::THREADS
                | WasmFeatures::EXCEPTIONS
                | WasmFeatures::MEMORY64
                | WasmFeatures::MULTI_MEMORY
                | WasmFeatures::TAIL_CALL
                | WasmFeatures::FUNCTION_REFERENCES
                | WasmFeatures::GC
                | WasmFeatures::COMPONENT_MODEL,
        );
        Self { features, config }
    }

    /// Create a new validator with the engine's features.
    pub fn new_validator(&self) -> Validator {
        Validator::new_with_features(self.features)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
