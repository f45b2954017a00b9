/*!
 * Stream Control
 * Owner-side control of a polling loop running in another process
 *
 * The ring stays in the loop's process. Its owner starts, pauses, drains
 * and stops it with these messages; hardware calls travel separately as
 * ordinary remote requests.
 */

use super::buffer::{Records, StreamBuffer};
use super::polling::{Controls, LoopReport};
use super::types::{HardwareError, IntegrityError};
use crate::ipc::Endpoint;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Command from a stream source to its loop process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamCommand {
    Start,
    Pause,
    ReadAll,
    Buffered,
    Overwritten,
    Running,
    Stop,
}

/// Answer from a loop process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reply", content = "value")]
pub enum StreamReply {
    /// First message, once the hardware is built or has failed to build
    Ready(Result<(), HardwareError>),
    Started,
    Streaming(bool),
    Records(Result<Records, IntegrityError>),
    Count(u64),
    Running(bool),
    Stopped(LoopReport),
}

/// Loop-process end of the control channel
pub type ControlServer = Endpoint<StreamReply, StreamCommand>;

/// Owner end of the control channel
pub type ControlClient = Endpoint<StreamCommand, StreamReply>;

/// Answer control commands until `Stop` or until the owner goes away
///
/// Runs beside the polling loop in the loop's process. `reports` yields the
/// loop's report once it has exited; an owner that disappears stops the loop.
pub fn serve_control(
    name: &str,
    control: &ControlServer,
    buffer: &StreamBuffer,
    controls: &Controls,
    reports: &flume::Receiver<LoopReport>,
) {
    loop {
        let command = match control.recv() {
            Ok(command) => command,
            Err(_) => {
                info!(source = %name, "Stream owner gone, stopping loop");
                controls.stop();
                return;
            }
        };
        debug!(source = %name, ?command, "Control command");

        let reply = match command {
            StreamCommand::Start => {
                controls.start();
                StreamReply::Started
            }
            StreamCommand::Pause => StreamReply::Streaming(controls.pause()),
            StreamCommand::ReadAll => StreamReply::Records(buffer.read_all()),
            StreamCommand::Buffered => StreamReply::Count(buffer.len() as u64),
            StreamCommand::Overwritten => StreamReply::Count(buffer.overwritten_total()),
            StreamCommand::Running => StreamReply::Running(reports.is_empty() && controls.is_running()),
            StreamCommand::Stop => {
                controls.stop();
                let report = reports.recv().unwrap_or_default();
                let _ = control.send(StreamReply::Stopped(report));
                return;
            }
        };
        if control.send(reply).is_err() {
            controls.stop();
            return;
        }
    }
}
