//! Target descriptions and capability queries.
//!
//! Transforms only consume coarse capability bits from the target; code
//! generation details live downstream. The one capability the pipeline
//! planner cares about is asynchronous global-to-shared copy issuance,
//! available on NVIDIA GPUs from compute capability 8.0 (Ampere) on.

/// Target architecture family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// NVIDIA GPU with the given compute capability (e.g. 80 for sm_80).
    Cuda { compute: u32 },
    /// AMD GPU.
    Rocm,
    /// Host CPU (used by tests and by lowering paths with no accelerator).
    Cpu,
}

/// A compilation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub arch: Arch,
}

impl Target {
    pub fn cuda(compute: u32) -> Self {
        Target { arch: Arch::Cuda { compute } }
    }

    pub fn cpu() -> Self {
        Target { arch: Arch::Cpu }
    }

    /// Whether the target can issue non-blocking global-to-shared copies
    /// (cp.async and successors).
    pub fn supports_async_copy(&self) -> bool {
        matches!(self.arch, Arch::Cuda { compute } if compute >= 80)
    }
}
