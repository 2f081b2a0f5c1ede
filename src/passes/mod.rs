//! IR transform passes.
//!
//! Each pass lives in its own module and exposes a `run(&mut Function)`
//! entry point that rewrites the function in place. Passes are pure and
//! deterministic: identical input produces bit-identical output, since
//! transform results must be reproducible across compiler runs.

pub mod pipeline_planning;

use crate::common::error::Result;
use crate::ir::Function;

/// Run the standard transform pipeline on a function.
pub fn run_transforms(func: &mut Function) -> Result<()> {
    pipeline_planning::run(func)?;
    Ok(())
}
