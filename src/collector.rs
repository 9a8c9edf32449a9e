//! Collector SSR controller: aggregates active-tool state and drives the
//! dust collector motor plus its strip-light indicator together.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::digital::OutputPin;
use heapless::Vec;

use crate::bus::{next_event, Event, EventBus, ToolEdge, ToolId};
use crate::error::{BusError, ConfigError};

/// Tools that should hold the collector on while active, and the GPIO pair
/// driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CollectorConfig<const N: usize> {
    pub tools: [ToolId; N],
}

impl<const N: usize> CollectorConfig<N> {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if N > 8 {
            return Err(ConfigError::TooManyItems { max: 8 });
        }
        Ok(())
    }
}

/// Pure aggregator: which tools are currently active, and whether the
/// collector should be energized as a result. Factored out of the async
/// event loop for direct unit testing.
pub struct ActiveSet<const N: usize> {
    active: Vec<ToolId, N>,
}

impl<const N: usize> ActiveSet<N> {
    pub fn new() -> Self {
        Self { active: Vec::new() }
    }

    pub fn is_on(&self) -> bool {
        !self.active.is_empty()
    }

    /// Apply one tool edge for a tool this aggregator tracks. Returns
    /// `true` if the on/off decision changed as a result (mirrors the
    /// original's `if not changed: continue` short-circuit).
    pub fn apply(&mut self, tool: ToolId, edge: ToolEdge) -> bool {
        let was_on = self.is_on();
        match edge {
            ToolEdge::On => {
                if !self.active.iter().any(|&t| t == tool) {
                    self.active.push(tool).ok();
                }
            }
            ToolEdge::Off => {
                if let Some(pos) = self.active.iter().position(|&t| t == tool) {
                    self.active.swap_remove(pos);
                }
            }
        }
        was_on != self.is_on()
    }
}

/// Run the collector controller forever. On cancellation the enclosing
/// supervisor must still be able to force the outputs off; callers should
/// keep a handle to `ssr`/`strip` (or re-run `force_off`) in their own
/// cleanup path since this function itself only returns on a fatal error.
pub async fn run_collector<SSR, STRIP, M, const N: usize, const CAP: usize, const SUBS: usize, const PUBS: usize>(
    mut ssr: SSR,
    mut strip: STRIP,
    cfg: CollectorConfig<N>,
    bus: &EventBus<M, CAP, SUBS, PUBS>,
) -> Result<(), BusError>
where
    SSR: OutputPin,
    STRIP: OutputPin,
    M: RawMutex,
{
    strip.set_low().map_err(|_| BusError::I2c)?;
    ssr.set_low().map_err(|_| BusError::I2c)?;
    let mut active = ActiveSet::<N>::new();
    let mut ssr_on = false;

    let mut sub = bus.subscribe();
    loop {
        let next = next_event(&mut sub).await;
        let (tool, edge) = match next.event {
            Event::Tool { tool, edge, .. } => (tool, edge),
            _ => continue,
        };
        if !cfg.tools.contains(&tool) {
            continue;
        }
        if !active.apply(tool, edge) {
            continue;
        }
        let want_on = active.is_on();
        if want_on && !ssr_on {
            strip.set_high().map_err(|_| BusError::I2c)?;
            ssr.set_high().map_err(|_| BusError::I2c)?;
            ssr_on = true;
        } else if !want_on && ssr_on {
            strip.set_low().map_err(|_| BusError::I2c)?;
            ssr.set_low().map_err(|_| BusError::I2c)?;
            ssr_on = false;
        }
    }
}
