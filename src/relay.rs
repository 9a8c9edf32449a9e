//! Byte relay bank with configurable polarity and the antagonistic-pair
//! safety primitive.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::error::{BusError, CoreError, SafetyViolation};
use crate::expander::ByteExpander;

/// Polarity of the expander pins driving the relay bank.
///
/// `active_low` is defined at the PCF output pin, not the downstream relay
/// board: a board wired through an inverting driver stage is
/// `active_low = false` even though the relay itself energizes on a low
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RelayBankConfig {
    pub active_low: bool,
}

pub struct RelayBank<'a, M: RawMutex, I2C> {
    expander: &'a ByteExpander<M, I2C>,
    cfg: RelayBankConfig,
    orig: u8,
}

impl<'a, M: RawMutex, I2C: embedded_hal_async::i2c::I2c> RelayBank<'a, M, I2C> {
    pub async fn new(expander: &'a ByteExpander<M, I2C>, cfg: RelayBankConfig) -> Self {
        let orig = expander.cached_state().await;
        Self { expander, cfg, orig }
    }

    fn drive_high(&self, on: bool) -> bool {
        if self.cfg.active_low { !on } else { on }
    }

    /// Drive a single relay bit, read-modify-write, leaving other bits
    /// untouched.
    pub async fn set_relay(&self, bit: u8, on: bool) -> Result<(), BusError> {
        let mask = 1u8 << bit;
        let value = if self.drive_high(on) { mask } else { 0 };
        self.expander.update_bits(mask, value).await?;
        Ok(())
    }

    /// Energize `bit` only if its antagonist is currently de-energized.
    /// This is the defense-in-depth check backing the "never both directions
    /// at once" invariant; callers (gate controllers) already guarantee this
    /// procedurally via deadtime sequencing, but a caller bug here is
    /// refused loudly instead of silently shoot-through-ing the H-bridge.
    pub async fn energize_exclusive(&self, bit: u8, antagonist_bit: u8) -> Result<(), CoreError> {
        let current = self.expander.cached_state().await;
        let antagonist_on = if self.cfg.active_low {
            (current & (1 << antagonist_bit)) == 0
        } else {
            (current & (1 << antagonist_bit)) != 0
        };
        if antagonist_on {
            return Err(SafetyViolation {
                a: bit,
                b: antagonist_bit,
            }
            .into());
        }
        self.set_relay(bit, true).await?;
        Ok(())
    }

    /// Atomically de-energize both bits of an antagonistic pair in a single
    /// bus transaction. This is the safety-critical primitive: direction
    /// reversal must never be split across two writes.
    pub async fn stop_pair(&self, bit_a: u8, bit_b: u8) -> Result<(), BusError> {
        let mask = (1u8 << bit_a) | (1u8 << bit_b);
        let off_high = self.drive_high(false);
        let value = if off_high { mask } else { 0 };
        self.expander.update_bits(mask, value).await?;
        Ok(())
    }

    /// Write the byte corresponding to "every relay de-energized" under the
    /// current polarity.
    pub async fn all_off(&self) -> Result<(), BusError> {
        let off = if self.cfg.active_low { 0xFF } else { 0x00 };
        self.expander.write_byte(off).await
    }

    /// Optionally restore the byte captured at construction.
    pub async fn close(&self, restore: bool) -> Result<(), BusError> {
        if restore {
            self.expander.write_byte(self.orig).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;
    use embedded_hal::i2c::ErrorType;

    struct FakeI2c {
        byte: u8,
    }

    impl ErrorType for FakeI2c {
        type Error = core::convert::Infallible;
    }

    impl embedded_hal_async::i2c::I2c for FakeI2c {
        async fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [embedded_hal_async::i2c::Operation<'_>],
        ) -> Result<(), Self::Error> {
            for op in operations {
                match op {
                    embedded_hal_async::i2c::Operation::Read(buf) => buf.fill(self.byte),
                    embedded_hal_async::i2c::Operation::Write(buf) => {
                        if let Some(&last) = buf.last() {
                            self.byte = last;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    fn block_on<F: core::future::Future>(f: F) -> F::Output {
        embassy_futures::block_on(f)
    }

    #[test]
    fn stop_pair_is_single_transaction_and_idempotent() {
        block_on(async {
            let expander: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0 }, 0x21, 0);
            let relays = RelayBank::new(
                &expander,
                RelayBankConfig { active_low: false },
            )
            .await;
            relays.set_relay(2, true).await.unwrap();
            relays.set_relay(3, true).await.unwrap();
            assert_eq!(expander.cached_state().await & 0b1100, 0b1100);
            relays.stop_pair(2, 3).await.unwrap();
            assert_eq!(expander.cached_state().await & 0b1100, 0);
            relays.stop_pair(2, 3).await.unwrap();
            assert_eq!(expander.cached_state().await & 0b1100, 0);
        });
    }

    #[test]
    fn energize_exclusive_refuses_when_antagonist_is_on() {
        block_on(async {
            let expander: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0 }, 0x21, 0);
            let relays = RelayBank::new(&expander, RelayBankConfig { active_low: false }).await;
            relays.set_relay(3, true).await.unwrap();
            let result = relays.energize_exclusive(2, 3).await;
            assert!(matches!(result, Err(CoreError::Safety(_))));
            assert_eq!(expander.cached_state().await & 0b0100, 0, "bit 2 was not energized");
        });
    }

    #[test]
    fn all_off_respects_polarity() {
        block_on(async {
            let expander: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0 }, 0x21, 0);
            let active_low = RelayBank::new(&expander, RelayBankConfig { active_low: true }).await;
            active_low.all_off().await.unwrap();
            assert_eq!(expander.cached_state().await, 0xFF);

            let expander2: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0xFF }, 0x21, 0xFF);
            let active_high =
                RelayBank::new(&expander2, RelayBankConfig { active_low: false }).await;
            active_high.all_off().await.unwrap();
            assert_eq!(expander2.cached_state().await, 0x00);
        });
    }
}
