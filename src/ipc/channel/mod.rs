/*!
 * Channel Module
 * Duplex request/response links between a supervisor and its workers
 */

pub mod endpoint;
pub mod frame;

// Re-export public API
#[cfg(unix)]
pub use endpoint::socket_pair;
pub use endpoint::{link_pair, pair, Endpoint, Link, Transport};
pub use frame::{read_frame, write_frame};
