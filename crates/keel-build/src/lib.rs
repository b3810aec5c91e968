//! Build planning for keel.
//!
//! Turns a resolved dependency set plus the host toolchain into a Ninja
//! build description: one `compile_cxx` build per source file, an archive
//! per library package, and a final link (or archive) for the root.

pub mod error;
pub mod planner;
pub mod sources;
pub mod toolchain;

pub use error::{BuildError, Result};
pub use planner::{plan, write_atomic, Plan, PlanOptions};
pub use sources::{source_files, WalkOptions};
pub use toolchain::{host_triple, Profile, Toolchain};
