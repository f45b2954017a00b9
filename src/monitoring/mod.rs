/*!
 * Monitoring
 * Structured logging setup and control-operation spans
 */

mod tracer;

pub use tracer::{init_tracing, span_control, ControlSpan, ENV_TRACE_JSON};
