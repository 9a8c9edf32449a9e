//! Semantic RED/GREEN LED pair on a byte expander.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::error::BusError;
use crate::expander::ByteExpander;

/// Polarity of the expander pins driving the LED pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LedPairConfig {
    pub green_bit: u8,
    pub red_bit: u8,
    pub active_low: bool,
}

/// A two-bit RED/GREEN indicator sharing a byte expander with other pairs.
pub struct LedPair<'a, M: RawMutex, I2C> {
    expander: &'a ByteExpander<M, I2C>,
    cfg: LedPairConfig,
    orig: u8,
}

impl<'a, M: RawMutex, I2C: embedded_hal_async::i2c::I2c> LedPair<'a, M, I2C> {
    /// Capture the expander's current byte as the value restored by
    /// `close(true)`.
    pub async fn new(expander: &'a ByteExpander<M, I2C>, cfg: LedPairConfig) -> Self {
        let orig = expander.cached_state().await;
        Self { expander, cfg, orig }
    }

    pub async fn set_green(&self) -> Result<(), BusError> {
        self.set(false, true).await
    }

    pub async fn set_red(&self) -> Result<(), BusError> {
        self.set(true, false).await
    }

    pub async fn set_off(&self) -> Result<(), BusError> {
        self.set(false, false).await
    }

    async fn set(&self, red_on: bool, green_on: bool) -> Result<(), BusError> {
        let mask = (1 << self.cfg.green_bit) | (1 << self.cfg.red_bit);
        let mut value = 0u8;
        value = Self::set_bit(value, self.cfg.green_bit, self.drive_high(green_on));
        value = Self::set_bit(value, self.cfg.red_bit, self.drive_high(red_on));
        self.expander.update_bits(mask, value).await?;
        Ok(())
    }

    fn drive_high(&self, on: bool) -> bool {
        if self.cfg.active_low { !on } else { on }
    }

    fn set_bit(byte: u8, bit: u8, high: bool) -> u8 {
        if high { byte | (1 << bit) } else { byte & !(1 << bit) }
    }

    /// Optionally restore the byte captured at construction, for shutdown.
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
    fn active_high_pair_is_mutually_exclusive() {
        block_on(async {
            let expander: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0 }, 0x20, 0);
            let pair = LedPair::new(
                &expander,
                LedPairConfig {
                    green_bit: 0,
                    red_bit: 1,
                    active_low: false,
                },
            )
            .await;
            pair.set_green().await.unwrap();
            assert_eq!(expander.cached_state().await, 0b01);
            pair.set_red().await.unwrap();
            assert_eq!(expander.cached_state().await, 0b10);
            pair.set_off().await.unwrap();
            assert_eq!(expander.cached_state().await, 0b00);
        });
    }

    #[test]
    fn active_low_pair_inverts_drive() {
        block_on(async {
            let expander: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0xFF }, 0x20, 0xFF);
            let pair = LedPair::new(
                &expander,
                LedPairConfig {
                    green_bit: 0,
                    red_bit: 1,
                    active_low: true,
                },
            )
            .await;
            pair.set_green().await.unwrap();
            // green energized (low) => bit 0 clear, red not energized (high) => bit 1 set
            assert_eq!(expander.cached_state().await & 0b11, 0b10);
        });
    }
}
