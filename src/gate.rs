//! Per-tool blast-gate motion controller.
//!
//! Boot state is CLOSED (LED red, both direction relays de-energized). A
//! `<tool>.on` event drives the gate open; `<tool>.off` drives it closed.
//! Direction reversal always passes through a de-energized deadtime before
//! asserting the new direction, and every exit path — normal timeout,
//! cancellation by a fresher command, or supervisor shutdown — unconditionally
//! de-energizes both direction relays before returning.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant, Timer};

use crate::bus::{next_event, Event, EventBus, ToolEdge, ToolId};
use crate::error::{ConfigError, CoreError};
use crate::led::{LedPair, LedPairConfig};
use crate::relay::RelayBank;

/// Mandatory off interval between de-energizing one direction relay and
/// energizing the other. Guards against shoot-through on the H-bridge.
pub const RELAY_DEADTIME: Duration = Duration::from_millis(100);

/// Maximum time a direction relay is driven before being automatically
/// stopped, absent an earlier reversal.
pub const MAX_DRIVE: Duration = Duration::from_secs(6);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GateConfig {
    pub name: &'static str,
    pub tool: ToolId,
    pub led_green_bit: u8,
    pub led_red_bit: u8,
    pub relay_open_bit: u8,
    pub relay_close_bit: u8,
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_open_bit == self.relay_close_bit {
            return Err(ConfigError::GateBitCollision { name: self.name });
        }
        Ok(())
    }

    pub fn led_config(&self) -> LedPairConfig {
        LedPairConfig {
            green_bit: self.led_green_bit,
            red_bit: self.led_red_bit,
            active_low: false,
        }
    }
}

/// Current direction of in-flight motion, `Idle` when both relays are
/// de-energized and no task is racing the drive timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Motion {
    Idle,
    Opening,
    Closing,
}

pub struct GateController<'a, M: RawMutex, I2cLed, I2cRelay> {
    cfg: GateConfig,
    leds: LedPair<'a, M, I2cLed>,
    relays: &'a RelayBank<'a, M, I2cRelay>,
    motion: Motion,
}

impl<'a, M, I2cLed, I2cRelay> GateController<'a, M, I2cLed, I2cRelay>
where
    M: RawMutex,
    I2cLed: embedded_hal_async::i2c::I2c,
    I2cRelay: embedded_hal_async::i2c::I2c,
{
    pub fn new(cfg: GateConfig, leds: LedPair<'a, M, I2cLed>, relays: &'a RelayBank<'a, M, I2cRelay>) -> Self {
        Self {
            cfg,
            leds,
            relays,
            motion: Motion::Idle,
        }
    }

    async fn relay_stop(&self) -> Result<(), CoreError> {
        self.relays
            .stop_pair(self.cfg.relay_open_bit, self.cfg.relay_close_bit)
            .await?;
        Ok(())
    }

    async fn relay_start_open(&self) -> Result<(), CoreError> {
        self.relays.set_relay(self.cfg.relay_close_bit, false).await?;
        Timer::after(RELAY_DEADTIME).await;
        self.relays
            .energize_exclusive(self.cfg.relay_open_bit, self.cfg.relay_close_bit)
            .await
    }

    async fn relay_start_close(&self) -> Result<(), CoreError> {
        self.relays.set_relay(self.cfg.relay_open_bit, false).await?;
        Timer::after(RELAY_DEADTIME).await;
        self.relays
            .energize_exclusive(self.cfg.relay_close_bit, self.cfg.relay_open_bit)
            .await
    }

    /// Run the controller forever, consuming events from `sub`. Returns only
    /// on a fatal bus error; normal shutdown is driven by cancelling the
    /// enclosing task, in which case `cleanup` below must still run (the
    /// supervisor is responsible for awaiting it before releasing the bus).
    pub async fn run<const CAP: usize, const SUBS: usize, const PUBS: usize>(
        &mut self,
        bus: &EventBus<M, CAP, SUBS, PUBS>,
    ) -> Result<(), CoreError> {
        let mut sub = bus.subscribe();

        self.leds.set_red().await?;
        self.relay_stop().await?;
        self.motion = Motion::Idle;

        loop {
            let next = next_event(&mut sub).await;
            let edge = match next.event {
                Event::Tool { tool, edge, .. } if tool == self.cfg.tool => edge,
                _ => continue,
            };
            match edge {
                ToolEdge::On => {
                    self.leds.set_green().await?;
                    self.motion = Motion::Opening;
                    self.drive_and_race(&mut sub, true).await?;
                }
                ToolEdge::Off => {
                    self.leds.set_red().await?;
                    self.motion = Motion::Closing;
                    self.drive_and_race(&mut sub, false).await?;
                }
            }
        }
    }

    /// Start motion in the requested direction, then race the max-drive
    /// deadline against inbound events for *this* tool. A same-direction
    /// retrigger extends the deadline (no additional relay energize); a
    /// reversal stops the pair and switches direction. Whichever way the
    /// deadline is finally reached, the relay pair is unconditionally
    /// stopped before returning — this is the guaranteed-cleanup-on-every-
    /// exit-path invariant.
    async fn drive_and_race<const CAP: usize, const SUBS: usize, const PUBS: usize>(
        &mut self,
        sub: &mut embassy_sync::pubsub::Subscriber<'_, M, crate::bus::TimestampedEvent, CAP, SUBS, PUBS>,
        mut opening: bool,
    ) -> Result<(), CoreError> {
        loop {
            let start_result = if opening {
                self.relay_start_open().await
            } else {
                self.relay_start_close().await
            };
            if let Err(e) = start_result {
                self.relay_stop().await.ok();
                self.motion = Motion::Idle;
                return Err(e);
            }

            let mut deadline = Instant::now() + MAX_DRIVE;
            let reversal = loop {
                match select(Timer::at(deadline), next_event(sub)).await {
                    Either::First(()) => break None,
                    Either::Second(evt) => match evt.event {
                        Event::Tool { tool, edge, .. } if tool == self.cfg.tool => {
                            let now_opening = matches!(edge, ToolEdge::On);
                            if now_opening == opening {
                                // Same-direction retrigger: re-arm the drive deadline,
                                // no additional relay energize.
                                deadline = Instant::now() + MAX_DRIVE;
                                continue;
                            }
                            break Some(edge);
                        }
                        _ => continue,
                    },
                }
            };

            self.relay_stop().await?;
            self.motion = Motion::Idle;

            match reversal {
                Some(edge) => {
                    // A reversal arrived mid-drive; loop back immediately with the
                    // new direction rather than waiting for the next top-level
                    // iteration to observe it a second time.
                    match edge {
                        ToolEdge::On => {
                            self.leds.set_green().await?;
                            self.motion = Motion::Opening;
                            opening = true;
                        }
                        ToolEdge::Off => {
                            self.leds.set_red().await?;
                            self.motion = Motion::Closing;
                            opening = false;
                        }
                    }
                    continue;
                }
                None => return Ok(()),
            }
        }
    }

    /// Unconditional teardown: stop motion, de-energize, release LEDs
    /// without restoring the boot byte (matches the original's
    /// `leds.close(restore=False)`).
    pub async fn cleanup(&mut self) -> Result<(), CoreError> {
        self.relay_stop().await?;
        self.motion = Motion::Idle;
        self.leds.close(false).await
    }
}
