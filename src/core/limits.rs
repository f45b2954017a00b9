/*!
 * System Limits and Constants
 *
 * Centralized location for the rig's tunable defaults and magic numbers.
 * Organized by domain so configuration structs can reference one place.
 */

use std::time::Duration;

// =============================================================================
// IPC LIMITS
// =============================================================================

/// Maximum payload of one socket frame (64 MiB)
/// A larger length prefix means a corrupt stream, not a real message
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Length prefix of a socket frame (u32, little-endian)
pub const FRAME_HEADER_SIZE: usize = 4;

// =============================================================================
// STREAMING
// =============================================================================

/// Seconds of samples a stream buffer holds before overwriting
pub const DEFAULT_BUFFER_SECONDS: u32 = 10;

/// Sleep between iterations of a polling loop that is not streaming
/// Keeps an idle loop off the CPU while commands stay responsive
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Eye tracker sample rate (Hz)
pub const EYE_UPDATE_FREQ: u32 = 500;

/// Eye tracker record width (x, y)
pub const EYE_DIMENSIONS: usize = 2;

/// Motion tracker sample rate (Hz)
pub const MOTION_UPDATE_FREQ: u32 = 480;

/// Markers tracked by default on the motion rig
pub const DEFAULT_MARKER_COUNT: usize = 8;

/// Coordinates per motion marker (x, y, z)
pub const MOTION_MARKER_DIMENSIONS: usize = 3;

// =============================================================================
// TASK WORKERS
// =============================================================================

/// Window a worker grants the supervisor to follow up after a failed call
/// Past this the worker abandons the task
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(60);

/// How often an idle worker re-checks whether its task reached a terminal state
pub const DEFAULT_WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Exit code reported for a worker whose body panicked
/// [LINUX-COMPAT] Matches the code Rust uses for a panicking main
pub const PANIC_EXIT_CODE: i32 = 101;

// =============================================================================
// MONITORING
// =============================================================================

/// Host control operations slower than this are logged at warn
/// Stopping joins the worker, so this is generous
pub const SLOW_CONTROL_THRESHOLD: Duration = Duration::from_secs(2);
