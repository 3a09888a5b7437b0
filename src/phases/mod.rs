//! The four staging-phase handlers
//!
//! The v2 platform invokes one of these per staging phase, each in its own
//! process. They share no memory; everything they hand each other goes
//! through the filesystem layout in [`crate::config`].

pub mod detect;
pub mod finalize;
pub mod release;
pub mod supply;

pub use detect::Detector;
pub use finalize::Finalizer;
pub use release::Releaser;
pub use supply::Supplier;
