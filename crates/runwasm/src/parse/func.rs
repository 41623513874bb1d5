use super::body::ParsedBody;

/// Index into the module's function index space (imports first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncIdx(pub(crate) u32);

/// A function defined in the module.
#[derive(Debug, Clone)]
pub(crate) struct ParsedFunction {
    pub(crate) type_idx: u32,
    pub(crate) param_count: usize,
    pub(crate) result_count: usize,
    /// Initial bits of the body-declared locals (params excluded).
    /// Numeric locals start at zero, reference locals at null.
    pub(crate) local_defaults: Box<[u64]>,
    pub(crate) body: ParsedBody,
}
