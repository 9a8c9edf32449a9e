//! Typed configuration shape. Loading a configuration document from disk is
//! outside this crate's scope; this module only defines and validates the
//! values an embedder hands in after parsing one.

use crate::adc::AdcChannelConfig;
use crate::aqm::policy::AqmPolicyConfig;
use crate::aqm::reader::AqmReaderConfig;
use crate::bus::ToolId;
use crate::error::ConfigError;
use crate::gate::GateConfig;
use embassy_time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HardwareMode {
    Mock,
    Real,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SafetyConfig {
    pub pause_fun_on_severe_aqm: bool,
    pub min_off_lockout_ms: u32,
}

/// Fully assembled, validated configuration for one controller instance.
///
/// `GATES` and `CHANNELS` are the number of configured gates and ADC
/// channels respectively, sized at the call site.
pub struct Config<const GATES: usize, const CHANNELS: usize> {
    pub hardware_mode: HardwareMode,
    pub outputs_enabled: bool,
    pub sample_hz: f32,
    pub gates: [GateConfig; GATES],
    pub channels: [AdcChannelConfig; CHANNELS],
    pub aqm_reader: AqmReaderConfig,
    pub aqm_policy: AqmPolicyConfig,
    pub collector_tools: [ToolId; CHANNELS],
}

impl<const GATES: usize, const CHANNELS: usize> Config<GATES, CHANNELS> {
    /// Validate cross-field invariants this crate depends on. Field-level
    /// validation for ADC channel thresholds and gate bit collisions is
    /// each component's own responsibility; this sweeps the whole
    /// collection and reports the first violation found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_hz <= 0.0 {
            return Err(ConfigError::BadSampleRate);
        }
        for gate in &self.gates {
            gate.validate()?;
        }
        for channel in &self.channels {
            channel.validate()?;
        }
        Ok(())
    }
}

impl SafetyConfig {
    pub fn min_off_lockout(&self) -> Duration {
        Duration::from_millis(self.min_off_lockout_ms as u64)
    }
}
