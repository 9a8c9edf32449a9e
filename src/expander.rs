//! Cached-state atomic I2C byte expander (PCF8574-style).
//!
//! A byte expander replaces all eight outputs on every write. Every mutation
//! here therefore goes through a single read-modify-write transaction guarded
//! by a mutex, so two callers touching disjoint bits never race each other's
//! write.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::I2c;

use crate::error::BusError;

/// A single I2C byte expander with a mirrored `state` byte.
///
/// `state` always equals the last byte successfully written (or the byte
/// observed at construction). A failed read never corrupts it.
pub struct ByteExpander<M: RawMutex, I2C> {
    inner: Mutex<M, Inner<I2C>>,
}

struct Inner<I2C> {
    i2c: I2C,
    addr: u8,
    state: u8,
}

impl<M: RawMutex, I2C: I2c> ByteExpander<M, I2C> {
    /// Construct with an initial cached state read from the device.
    pub async fn new(mut i2c: I2C, addr: u8) -> Result<Self, BusError> {
        let mut buf = [0u8; 1];
        i2c.read(addr, &mut buf).await.map_err(|_| BusError::I2c)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                i2c,
                addr,
                state: buf[0],
            }),
        })
    }

    /// Construct assuming the device is already in a known state (e.g. right
    /// after a forced boot-time write), skipping the initial read.
    pub fn from_known_state(i2c: I2C, addr: u8, state: u8) -> Self {
        Self {
            inner: Mutex::new(Inner { i2c, addr, state }),
        }
    }

    /// Last byte successfully written (or observed at construction).
    pub async fn cached_state(&self) -> u8 {
        self.inner.lock().await.state
    }

    /// Re-read the device and refresh the cache. Returns the freshly read
    /// byte.
    pub async fn read_byte(&self) -> Result<u8, BusError> {
        let mut guard = self.inner.lock().await;
        let mut buf = [0u8; 1];
        guard
            .i2c
            .read(guard.addr, &mut buf)
            .await
            .map_err(|_| BusError::I2c)?;
        guard.state = buf[0];
        Ok(buf[0])
    }

    /// Write a full byte, replacing all outputs, and update the cache on
    /// success.
    pub async fn write_byte(&self, value: u8) -> Result<(), BusError> {
        let mut guard = self.inner.lock().await;
        guard
            .i2c
            .write(guard.addr, &[value])
            .await
            .map_err(|_| BusError::I2c)?;
        guard.state = value;
        Ok(())
    }

    /// Atomic read-modify-write: `new = (state & !mask) | (value & mask)`.
    /// Returns the byte written.
    pub async fn update_bits(&self, mask: u8, value: u8) -> Result<u8, BusError> {
        let mut guard = self.inner.lock().await;
        let new = (guard.state & !mask) | (value & mask);
        guard
            .i2c
            .write(guard.addr, &[new])
            .await
            .map_err(|_| BusError::I2c)?;
        guard.state = new;
        Ok(new)
    }

    /// Drive a single bit high or low, leaving every other bit untouched.
    pub async fn write_bit(&self, bit: u8, on: bool) -> Result<u8, BusError> {
        if bit > 7 {
            return Err(BusError::InvalidBit(bit));
        }
        let mask = 1u8 << bit;
        self.update_bits(mask, if on { mask } else { 0 }).await
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
                    embedded_hal_async::i2c::Operation::Read(buf) => {
                        buf.fill(self.byte);
                    }
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
    fn update_bits_only_touches_masked_bits() {
        block_on(async {
            let expander: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0b1111_1111 }, 0x20, 0b1111_1111);
            expander.update_bits(0b0000_0011, 0b0000_0001).await.unwrap();
            assert_eq!(expander.cached_state().await, 0b1111_1101);
            expander.update_bits(0b0000_1100, 0b0000_0100).await.unwrap();
            assert_eq!(expander.cached_state().await, 0b1111_0101);
        });
    }

    #[test]
    fn write_bit_rejects_out_of_range() {
        block_on(async {
            let expander: ByteExpander<NoopRawMutex, _> =
                ByteExpander::from_known_state(FakeI2c { byte: 0 }, 0x20, 0);
            let result = expander.write_bit(8, true).await;
            assert!(matches!(result, Err(BusError::InvalidBit(8))));
        });
    }
}
