/*!
 * Core Types
 * Common types used across the rig kernel
 */

/// Dynamically typed value carried by remote calls and replies
pub type Value = serde_json::Value;

/// Keyword arguments of a remote call
pub type Kwargs = serde_json::Map<String, Value>;

/// One flattened sensor sample
pub type Sample = Vec<f64>;

/// Worker identifier (OS pid for forked workers, sequence number for threads)
pub type WorkerId = u32;
