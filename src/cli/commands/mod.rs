//! CLI command implementations

pub mod detect;
pub mod finalize;
pub mod release;
pub mod supply;

pub use detect::execute as detect;
pub use finalize::execute as finalize;
pub use release::execute as release;
pub use supply::execute as supply;
