//! Filter-fan actuation and severe-air "pause fun" signaling.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant};
use embedded_hal::digital::OutputPin;
use embedded_io_async::Write;

use crate::bus::{next_event, Event, EventBus};
use crate::error::BusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AqmPolicyConfig {
    pub fan_on_when_bad: bool,
    pub pause_fun_on_severe: bool,
    pub min_off_lockout: Duration,
}

const FUN_PAUSE_CMD: &[u8] = b"FUN PAUSE\n";

/// Drive a fan output pin and optionally an outbound serial "pause fun"
/// notice from `aqm.bad`/`aqm.good` transitions.
///
/// `fan` and `fun_tx` are generic over `embedded-hal`/`embedded-io-async` so
/// the same policy logic runs against mock or real hardware.
pub async fn run_policy<FAN, TX, M, const CAP: usize, const SUBS: usize, const PUBS: usize>(
    mut fan: FAN,
    mut fun_tx: Option<TX>,
    cfg: AqmPolicyConfig,
    bus: &EventBus<M, CAP, SUBS, PUBS>,
) -> Result<(), BusError>
where
    FAN: OutputPin,
    TX: Write,
    M: RawMutex,
{
    fan.set_low().map_err(|_| BusError::I2c)?;
    let mut fan_is_on = false;
    let mut last_fan_off_at = Instant::now();
    let mut severe_latched = false;

    let mut sub = bus.subscribe();
    loop {
        let next = next_event(&mut sub).await;
        let transition = match next.event {
            Event::AqmTransition(t) => t,
            _ => continue,
        };

        if cfg.fan_on_when_bad {
            if transition.is_bad {
                if !fan_is_on {
                    let elapsed = Instant::now() - last_fan_off_at;
                    if cfg.min_off_lockout == Duration::from_ticks(0) || elapsed >= cfg.min_off_lockout {
                        fan.set_high().map_err(|_| BusError::I2c)?;
                        fan_is_on = true;
                    }
                }
            } else if fan_is_on {
                fan.set_low().map_err(|_| BusError::I2c)?;
                fan_is_on = false;
                last_fan_off_at = Instant::now();
            }
        }

        if cfg.pause_fun_on_severe {
            if let Some(tx) = fun_tx.as_mut() {
                if transition.severe && !severe_latched {
                    tx.write_all(FUN_PAUSE_CMD).await.map_err(|_| BusError::I2c)?;
                    severe_latched = true;
                } else if !transition.severe && severe_latched {
                    severe_latched = false;
                }
            }
        }
    }
}
