/*!
 * Simulated Hardware
 * Eye and motion trackers that run without devices
 */

use super::hardware::Hardware;
use super::types::HardwareError;
use crate::core::limits::{DEFAULT_MARKER_COUNT, EYE_UPDATE_FREQ, MOTION_UPDATE_FREQ};
use crate::core::types::{Kwargs, Sample, Value};
use crate::ipc::rpc::{arg, Dispatch, RemoteError};
use serde_json::json;
use std::f64::consts::TAU;
use std::thread;
use std::time::{Duration, Instant};

/// Paces samples to a fixed rate; a zero rate never waits
#[derive(Debug)]
struct Clock {
    rate: u32,
    next: Option<Instant>,
    ticks: u64,
}

impl Clock {
    fn new(rate: u32) -> Self {
        Self {
            rate,
            next: None,
            ticks: 0,
        }
    }

    /// Block until the next sample is due, returning the sample time in seconds
    fn tick(&mut self) -> f64 {
        if self.rate > 0 {
            let period = Duration::from_secs_f64(1.0 / f64::from(self.rate));
            let now = Instant::now();
            let due = self.next.unwrap_or(now);
            if due > now {
                thread::sleep(due - now);
            }
            // Never try to catch up more than one period after a stall
            self.next = Some(due.max(now) + period);
        }
        let t = self.ticks as f64 / f64::from(self.rate.max(1));
        self.ticks += 1;
        t
    }

    fn restart(&mut self) {
        self.next = None;
        self.ticks = 0;
    }
}

/// Gaze tracing a slow Lissajous figure
#[derive(Debug)]
pub struct EyeSim {
    clock: Clock,
    gain: f64,
    running: bool,
}

impl Default for EyeSim {
    fn default() -> Self {
        Self::new()
    }
}

impl EyeSim {
    #[must_use]
    pub fn new() -> Self {
        Self {
            clock: Clock::new(EYE_UPDATE_FREQ),
            gain: 1.0,
            running: false,
        }
    }

    /// Sample rate in Hz, zero for as fast as polled
    #[must_use]
    pub fn with_rate(mut self, hz: u32) -> Self {
        self.clock = Clock::new(hz);
        self
    }
}

impl Dispatch for EyeSim {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "update_freq" => Some(json!(self.clock.rate)),
            "samples" => Some(json!(self.clock.ticks)),
            "gain" => Some(json!(self.gain)),
            "running" => Some(json!(self.running)),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        matches!(name, "set_gain" | "reset")
    }

    fn invoke(&mut self, name: &str, args: &[Value], _kwargs: &Kwargs) -> Result<Value, RemoteError> {
        match name {
            "set_gain" => {
                let gain: f64 = arg(name, args, 0)?;
                if !gain.is_finite() {
                    return Err(RemoteError::raised("ValueError", "gain must be finite"));
                }
                self.gain = gain;
                Ok(json!(self.gain))
            }
            "reset" => {
                self.clock.restart();
                Ok(Value::Null)
            }
            _ => Err(RemoteError::NotFound(name.to_string())),
        }
    }
}

impl Hardware for EyeSim {
    fn start(&mut self) -> Result<(), HardwareError> {
        self.clock.restart();
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.running = false;
        Ok(())
    }

    fn get(&mut self) -> Result<Option<Sample>, HardwareError> {
        if !self.running {
            return Err(HardwareError::Acquisition("eye tracker not started".to_string()));
        }
        let t = self.clock.tick();
        Ok(Some(vec![
            self.gain * (TAU * 0.5 * t).sin(),
            self.gain * (TAU * 0.25 * t).cos(),
        ]))
    }
}

/// Markers circling at staggered phases
#[derive(Debug)]
pub struct MotionSim {
    clock: Clock,
    markers: usize,
    running: bool,
}

impl Default for MotionSim {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_COUNT)
    }
}

impl MotionSim {
    #[must_use]
    pub fn new(markers: usize) -> Self {
        Self {
            clock: Clock::new(MOTION_UPDATE_FREQ),
            markers: markers.max(1),
            running: false,
        }
    }

    #[must_use]
    pub fn with_rate(mut self, hz: u32) -> Self {
        self.clock = Clock::new(hz);
        self
    }
}

impl Dispatch for MotionSim {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "update_freq" => Some(json!(self.clock.rate)),
            "samples" => Some(json!(self.clock.ticks)),
            "marker_count" => Some(json!(self.markers)),
            _ => None,
        }
    }

    fn has_method(&self, name: &str) -> bool {
        name == "reset"
    }

    fn invoke(&mut self, name: &str, _args: &[Value], _kwargs: &Kwargs) -> Result<Value, RemoteError> {
        match name {
            "reset" => {
                self.clock.restart();
                Ok(Value::Null)
            }
            _ => Err(RemoteError::NotFound(name.to_string())),
        }
    }
}

impl Hardware for MotionSim {
    fn start(&mut self) -> Result<(), HardwareError> {
        self.clock.restart();
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.running = false;
        Ok(())
    }

    fn get(&mut self) -> Result<Option<Sample>, HardwareError> {
        if !self.running {
            return Err(HardwareError::Acquisition("motion tracker not started".to_string()));
        }
        let t = self.clock.tick();
        let sample = (0..self.markers)
            .flat_map(|m| {
                let phase = TAU * t + m as f64;
                [phase.sin(), phase.cos(), m as f64]
            })
            .collect();
        Ok(Some(sample))
    }
}
