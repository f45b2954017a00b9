/*!
 * Core Module
 * Shared types, system-wide limits and the error umbrella
 */

pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use errors::RigError;
pub use types::*;
