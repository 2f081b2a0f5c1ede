//! Buffers and memory scopes.

/// A buffer identifier. Uses a u32 index for zero-cost copies; the buffer's
/// metadata (name, scope, shape) lives in a `Buffer` and is resolved through
/// the scope stack at the point of use, so block-local allocations can
/// shadow outer bindings of the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Memory scope of a buffer.
///
/// `Global` is device memory; the rest are on-chip storage classes. The
/// pipeline planner treats `Shared`, `SharedDyn`, and `Local` as the fast
/// scopes a bulk copy may target. `Fragment` is register tile storage owned
/// by matrix units and is never a copy destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemScope {
    Global,
    Shared,
    SharedDyn,
    Local,
    Fragment,
}

impl MemScope {
    pub fn as_str(self) -> &'static str {
        match self {
            MemScope::Global => "global",
            MemScope::Shared => "shared",
            MemScope::SharedDyn => "shared.dyn",
            MemScope::Local => "local",
            MemScope::Fragment => "local.fragment",
        }
    }

    /// Parse a scope string. Returns `None` for unrecognized scopes.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "global" => Some(MemScope::Global),
            "shared" => Some(MemScope::Shared),
            "shared.dyn" => Some(MemScope::SharedDyn),
            "local" => Some(MemScope::Local),
            "local.fragment" => Some(MemScope::Fragment),
            _ => None,
        }
    }

    /// Whether a bulk copy from global memory may land in this scope.
    pub fn is_copy_destination(self) -> bool {
        matches!(self, MemScope::Shared | MemScope::SharedDyn | MemScope::Local)
    }
}

impl std::fmt::Display for MemScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A multi-dimensional buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub id: BufferId,
    pub name: String,
    pub scope: MemScope,
    /// Extent of each dimension, in elements.
    pub shape: Vec<i64>,
}

impl Buffer {
    pub fn new(id: u32, name: &str, scope: MemScope, shape: Vec<i64>) -> Self {
        Buffer { id: BufferId(id), name: name.to_string(), scope, shape }
    }
}
