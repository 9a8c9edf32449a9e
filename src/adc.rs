//! Multi-channel hysteretic tool detector.
//!
//! Each channel samples a voltage source on a fixed period and runs an
//! independent debounce counter: `consecutive_required` same-direction
//! samples past the relevant threshold are needed before an edge commits.

use embassy_time::{Duration, Timer};

use crate::bus::{Event, EventBus, ToolEdge, ToolId};
use crate::error::ConfigError;
use embassy_sync::blocking_mutex::raw::RawMutex;

/// Per-channel configuration. `off_threshold` must be strictly below
/// `on_threshold`; this is the hysteresis band that prevents edge chatter.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcChannelConfig {
    pub tool: ToolId,
    pub on_threshold: f32,
    pub off_threshold: f32,
    pub consecutive_required: u8,
}

impl AdcChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.off_threshold >= self.on_threshold {
            return Err(ConfigError::InvertedThresholds {
                tool: tool_name(self.tool),
                off: (self.off_threshold * 1000.0) as i32,
                on: (self.on_threshold * 1000.0) as i32,
            });
        }
        if self.consecutive_required < 1 {
            return Err(ConfigError::BadConsecutiveRequired);
        }
        Ok(())
    }
}

fn tool_name(tool: ToolId) -> &'static str {
    match tool {
        ToolId::Saw => "saw",
        ToolId::Lathe => "lathe",
    }
}

/// Pure per-channel debounce state machine, factored out of the async
/// sampling loop so it can be exercised with plain unit tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDetector {
    is_on: bool,
    above_on: u8,
    below_off: u8,
}

impl ChannelDetector {
    pub const fn new() -> Self {
        Self {
            is_on: false,
            above_on: 0,
            below_off: 0,
        }
    }

    /// Feed one sample; returns `Some(edge)` exactly when this sample
    /// committed a transition.
    pub fn sample(&mut self, voltage: f32, cfg: &AdcChannelConfig) -> Option<ToolEdge> {
        if !self.is_on {
            if voltage >= cfg.on_threshold {
                self.above_on += 1;
                if self.above_on >= cfg.consecutive_required {
                    self.is_on = true;
                    self.above_on = 0;
                    self.below_off = 0;
                    return Some(ToolEdge::On);
                }
            } else {
                self.above_on = 0;
            }
        } else if voltage <= cfg.off_threshold {
            self.below_off += 1;
            if self.below_off >= cfg.consecutive_required {
                self.is_on = false;
                self.above_on = 0;
                self.below_off = 0;
                return Some(ToolEdge::Off);
            }
        } else {
            self.below_off = 0;
        }
        None
    }
}

/// A voltage source for one ADC channel. A concrete deployment implements
/// this over an `embedded-hal-async` ADC driver; tests implement it over a
/// canned sample sequence.
pub trait VoltageSource {
    async fn read_voltage(&mut self) -> f32;
}

/// Run one channel's sample/detect/publish loop forever. Intended to be
/// spawned once per configured channel via
/// `#[embassy_executor::task(pool_size = N)]`.
pub async fn run_channel<V, M, const CAP: usize, const SUBS: usize, const PUBS: usize>(
    mut source: V,
    cfg: AdcChannelConfig,
    sample_hz: f32,
    bus: &EventBus<M, CAP, SUBS, PUBS>,
) -> !
where
    V: VoltageSource,
    M: RawMutex,
{
    let period = Duration::from_micros((1_000_000.0 / sample_hz) as u64);
    let mut detector = ChannelDetector::new();
    loop {
        let voltage = source.read_voltage().await;
        if let Some(edge) = detector.sample(voltage, &cfg) {
            bus.publish(Event::tool(cfg.tool, edge, voltage));
        }
        Timer::after(period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAW: AdcChannelConfig = AdcChannelConfig {
        tool: ToolId::Saw,
        on_threshold: 1.00,
        off_threshold: 0.30,
        consecutive_required: 3,
    };

    #[test]
    fn commits_edges_only_after_consecutive_run() {
        let mut det = ChannelDetector::new();
        let samples = [0.2, 0.5, 0.9, 1.0, 1.0, 1.0, 0.5, 0.8, 0.6, 0.2, 0.2, 0.2];
        let mut events = heapless::Vec::<ToolEdge, 8>::new();
        for v in samples {
            if let Some(e) = det.sample(v, &SAW) {
                events.push(e).unwrap();
            }
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], ToolEdge::On);
        assert_eq!(events[1], ToolEdge::Off);
    }

    #[test]
    fn non_consecutive_run_resets_the_counter() {
        let mut det = ChannelDetector::new();
        assert_eq!(det.sample(1.0, &SAW), None);
        assert_eq!(det.sample(1.0, &SAW), None);
        // drops back below threshold: above_on resets to zero
        assert_eq!(det.sample(0.5, &SAW), None);
        // two more samples is not yet three consecutive since the reset
        assert_eq!(det.sample(1.0, &SAW), None);
        assert_eq!(det.sample(1.0, &SAW), None);
        assert_eq!(det.sample(1.0, &SAW), Some(ToolEdge::On));
    }

    #[test]
    fn boundary_values_count_as_crossing() {
        let mut det = ChannelDetector::new();
        assert_eq!(det.sample(1.00, &SAW), None);
        assert_eq!(det.sample(1.00, &SAW), None);
        assert_eq!(det.sample(1.00, &SAW), Some(ToolEdge::On));
        assert_eq!(det.sample(0.30, &SAW), None);
        assert_eq!(det.sample(0.30, &SAW), None);
        assert_eq!(det.sample(0.30, &SAW), Some(ToolEdge::Off));
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        let bad = AdcChannelConfig {
            off_threshold: 1.0,
            on_threshold: 0.5,
            ..SAW
        };
        assert!(bad.validate().is_err());
    }
}
