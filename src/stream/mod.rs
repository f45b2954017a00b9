/*!
 * Streaming Module
 * Lossy sample rings filled by hardware polling loops
 */

pub mod buffer;
pub mod control;
pub mod hardware;
pub mod polling;
pub mod sim;
pub mod source;
pub mod types;

pub use buffer::{RecordFilter, Records, StreamBuffer};
pub use control::{StreamCommand, StreamReply};
pub use hardware::{ChannelSink, Hardware, SampleSink, SinkEvent};
pub use polling::{Controls, LoopReport, PollingLoop};
pub use sim::{EyeSim, MotionSim};
pub use source::StreamSource;
pub use types::{
    HardwareError, IntegrityError, IntegrityResult, RecordShape, SinkError, StreamConfig,
    StreamError, StreamResult,
};
