//! Plantower PMS-family particulate sensor reader: frame synchronization,
//! windowed filtering and bad/good air hysteresis.

use embedded_io_async::Read;
use heapless::Deque;

use crate::bus::{AqmMetrics, AqmTransition, Event, EventBus};
use crate::error::{ConfigError, FrameError};
use embassy_sync::blocking_mutex::raw::RawMutex;

pub const START1: u8 = 0x42;
pub const START2: u8 = 0x4D;
pub const FRAME_LEN: usize = 32;

/// Upper bound on either filter window; large enough for any sane
/// configuration while keeping the rolling histories allocation-free.
pub const MAX_WINDOW: usize = 64;

/// Parsed particulate concentrations from one valid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmsFrame {
    pub pm1_0_cf1: u16,
    pub pm2_5_cf1: u16,
    pub pm10_cf1: u16,
    pub pm1_0_atm: u16,
    pub pm2_5_atm: u16,
    pub pm10_atm: u16,
}

fn be16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

/// Verify the frame checksum (big-endian sum of bytes 0..30 at bytes 30,31)
/// and parse both calibration sets out of a 32-byte frame.
pub fn parse_frame(frame: &[u8; FRAME_LEN]) -> Result<PmsFrame, FrameError> {
    let expected = be16(frame, 30);
    let computed: u16 = frame[..30]
        .iter()
        .fold(0u32, |acc, &b| acc + b as u32) as u16;
    if computed != expected {
        return Err(FrameError::ChecksumMismatch { expected, computed });
    }
    Ok(PmsFrame {
        pm1_0_cf1: be16(frame, 4),
        pm2_5_cf1: be16(frame, 6),
        pm10_cf1: be16(frame, 8),
        pm1_0_atm: be16(frame, 10),
        pm2_5_atm: be16(frame, 12),
        pm10_atm: be16(frame, 14),
    })
}

impl PmsFrame {
    /// Select the CF=1 (factory) or atmospheric calibration.
    pub fn pick(&self, use_cf1: bool) -> (u16, u16, u16) {
        if use_cf1 {
            (self.pm1_0_cf1, self.pm2_5_cf1, self.pm10_cf1)
        } else {
            (self.pm1_0_atm, self.pm2_5_atm, self.pm10_atm)
        }
    }
}

/// Byte-stream scanner that locates and validates 32-byte PMS frames.
///
/// Reads one byte at a time looking for the two-byte header; on a checksum
/// mismatch the scan restarts rather than treating it as fatal, matching the
/// "discard and resume scanning" behavior of a noisy serial link.
pub struct FrameSync;

impl FrameSync {
    /// Read until the next valid frame, or `Ok(None)` if the underlying
    /// reader reports no data (a serial read timeout, not an error).
    pub async fn next_frame<R: Read>(reader: &mut R) -> Result<Option<PmsFrame>, FrameError> {
        loop {
            let Some(b0) = Self::read_byte(reader).await? else {
                return Ok(None);
            };
            if b0 != START1 {
                continue;
            }
            let Some(b1) = Self::read_byte(reader).await? else {
                return Ok(None);
            };
            if b1 != START2 {
                continue;
            }
            let mut frame = [0u8; FRAME_LEN];
            frame[0] = b0;
            frame[1] = b1;
            if !Self::fill(reader, &mut frame[2..]).await? {
                return Ok(None);
            }
            match parse_frame(&frame) {
                Ok(parsed) => return Ok(Some(parsed)),
                Err(FrameError::ChecksumMismatch { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    async fn read_byte<R: Read>(reader: &mut R) -> Result<Option<u8>, FrameError> {
        let mut b = [0u8; 1];
        let n = reader.read(&mut b).await.map_err(|_| FrameError::Io)?;
        if n == 0 { Ok(None) } else { Ok(Some(b[0])) }
    }

    async fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, FrameError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = reader
                .read(&mut buf[filled..])
                .await
                .map_err(|_| FrameError::Io)?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AqmReaderConfig {
    pub bad_on_threshold: u16,
    pub bad_off_threshold: u16,
    pub severe_threshold: u16,
    pub filter_window_good: usize,
    pub filter_window_bad: usize,
    pub use_cf1: bool,
}

impl AqmReaderConfig {
    /// Construct, clamping `bad_off_threshold` below `bad_on_threshold` if
    /// the caller's raw value would otherwise prevent the hysteresis from
    /// ever clearing.
    pub fn new(
        bad_on_threshold: u16,
        bad_off_threshold_raw: u16,
        severe_threshold: u16,
        filter_window_good: usize,
        filter_window_bad: usize,
        use_cf1: bool,
    ) -> Result<Self, ConfigError> {
        if filter_window_good == 0 || filter_window_bad == 0 {
            return Err(ConfigError::BadSampleRate);
        }
        if filter_window_good > MAX_WINDOW || filter_window_bad > MAX_WINDOW {
            return Err(ConfigError::TooManyItems { max: MAX_WINDOW });
        }
        let bad_off_threshold = if bad_off_threshold_raw >= bad_on_threshold {
            bad_on_threshold.saturating_sub(1)
        } else {
            bad_off_threshold_raw
        };
        Ok(Self {
            bad_on_threshold,
            bad_off_threshold,
            severe_threshold,
            filter_window_good,
            filter_window_bad,
            use_cf1,
        })
    }
}

/// Rolling windowed filter plus the `is_bad` hysteresis latch, factored out
/// of the async reader loop for direct unit testing.
pub struct AqmFilter {
    pm1_0: Deque<u16, MAX_WINDOW>,
    pm2_5: Deque<u16, MAX_WINDOW>,
    pm10: Deque<u16, MAX_WINDOW>,
    is_bad: bool,
    have_prior: bool,
}

impl AqmFilter {
    pub const fn new() -> Self {
        Self {
            pm1_0: Deque::new(),
            pm2_5: Deque::new(),
            pm10: Deque::new(),
            is_bad: false,
            have_prior: false,
        }
    }

    fn push(history: &mut Deque<u16, MAX_WINDOW>, value: u16) {
        if history.len() == MAX_WINDOW {
            history.pop_front();
        }
        history.push_back(value).ok();
    }

    fn avg_last(history: &Deque<u16, MAX_WINDOW>, n: usize) -> u16 {
        let take = n.min(history.len());
        if take == 0 {
            return 0;
        }
        let sum: u32 = history.iter().rev().take(take).map(|&v| v as u32).sum();
        ((sum + take as u32 / 2) / take as u32) as u16
    }

    /// Ingest one parsed frame, returning the metrics event to publish and,
    /// only on an `is_bad` transition, the transition event.
    pub fn ingest(
        &mut self,
        frame: &PmsFrame,
        cfg: &AqmReaderConfig,
    ) -> (AqmMetrics, Option<AqmTransition>) {
        let (pm1_0_raw, pm2_5_raw, pm10_raw) = frame.pick(cfg.use_cf1);
        Self::push(&mut self.pm1_0, pm1_0_raw);
        Self::push(&mut self.pm2_5, pm2_5_raw);
        Self::push(&mut self.pm10, pm10_raw);

        let win_cur = if self.is_bad {
            cfg.filter_window_bad
        } else {
            cfg.filter_window_good
        };
        let pm1_0 = Self::avg_last(&self.pm1_0, win_cur);
        let pm2_5 = Self::avg_last(&self.pm2_5, win_cur);
        let pm10 = Self::avg_last(&self.pm10, win_cur);

        let metrics = AqmMetrics {
            pm1_0,
            pm2_5,
            pm10,
            filter_window: win_cur,
        };

        let was_bad = self.is_bad;
        if self.is_bad {
            if pm2_5 <= cfg.bad_off_threshold {
                self.is_bad = false;
            }
        } else if pm2_5 >= cfg.bad_on_threshold {
            self.is_bad = true;
        }
        let severe = pm2_5 >= cfg.severe_threshold;

        let transition = if !self.have_prior || self.is_bad != was_bad {
            self.have_prior = true;
            Some(AqmTransition {
                is_bad: self.is_bad,
                pm2_5,
                severe,
            })
        } else {
            None
        };

        (metrics, transition)
    }
}

/// Drive the reader forever: pull frames from the serial port, filter them,
/// publish `AqmMetrics` on every frame and `AqmTransition` on hysteresis
/// edges. A read that yields no frame (serial timeout) is not an error and
/// simply loops again.
pub async fn run_reader<R, M, const CAP: usize, const SUBS: usize, const PUBS: usize>(
    mut port: R,
    cfg: AqmReaderConfig,
    bus: &EventBus<M, CAP, SUBS, PUBS>,
) -> Result<(), FrameError>
where
    R: Read,
    M: RawMutex,
{
    let mut filter = AqmFilter::new();
    loop {
        match FrameSync::next_frame(&mut port).await? {
            None => continue,
            Some(frame) => {
                let (metrics, transition) = filter.ingest(&frame, &cfg);
                bus.publish(Event::aqm_metrics(metrics));
                if let Some(t) = transition {
                    bus.publish(Event::aqm_transition(t));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(pm2_5_cf1: u16, pm2_5_atm: u16) -> [u8; FRAME_LEN] {
        let mut f = [0u8; FRAME_LEN];
        f[0] = START1;
        f[1] = START2;
        let cf1 = pm2_5_cf1.to_be_bytes();
        f[6] = cf1[0];
        f[7] = cf1[1];
        let atm = pm2_5_atm.to_be_bytes();
        f[12] = atm[0];
        f[13] = atm[1];
        let sum: u32 = f[..30].iter().map(|&b| b as u32).sum();
        let cksum = (sum as u16).to_be_bytes();
        f[30] = cksum[0];
        f[31] = cksum[1];
        f
    }

    #[test]
    fn checksum_roundtrips() {
        let f = frame_with(10, 12);
        let parsed = parse_frame(&f).unwrap();
        assert_eq!(parsed.pm2_5_cf1, 10);
        assert_eq!(parsed.pm2_5_atm, 12);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let mut f = frame_with(10, 12);
        f[31] ^= 0xFF;
        assert!(matches!(
            parse_frame(&f),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn avg_last_uses_fewer_than_window_samples_when_history_is_short() {
        let mut h: Deque<u16, MAX_WINDOW> = Deque::new();
        h.push_back(10).unwrap();
        h.push_back(20).unwrap();
        assert_eq!(AqmFilter::avg_last(&h, 5), 15);
    }

    #[test]
    fn is_bad_transitions_use_asymmetric_windows() {
        let cfg = AqmReaderConfig::new(35, 30, 75, 2, 4, false).unwrap();
        let mut filter = AqmFilter::new();

        // First frame always emits a transition (initial classification).
        let (_, t0) = filter.ingest(&frame_as(10), &cfg);
        assert_eq!(t0.unwrap().is_bad, false);

        // Push the average over 35 using the (good) 2-sample window.
        let (_, t1) = filter.ingest(&frame_as(40), &cfg);
        assert!(t1.is_none());
        let (_, t2) = filter.ingest(&frame_as(40), &cfg);
        assert_eq!(t2.unwrap().is_bad, true);

        // Now the window grows to 4 (bad window); averaging in enough good
        // samples pulls pm2.5 back under bad_off_threshold and clears the
        // latch within this run.
        let mut cleared = false;
        for _ in 0..4 {
            let (_, t) = filter.ingest(&frame_as(10), &cfg);
            if let Some(t) = t {
                assert_eq!(t.is_bad, false);
                cleared = true;
            }
        }
        assert!(cleared, "hysteresis never cleared back to good air");
        let (_, t3) = filter.ingest(&frame_as(10), &cfg);
        assert!(t3.is_none(), "state should already be settled as good air");
    }

    fn frame_as(pm2_5: u16) -> PmsFrame {
        PmsFrame {
            pm1_0_cf1: pm2_5,
            pm2_5_cf1: pm2_5,
            pm10_cf1: pm2_5,
            pm1_0_atm: pm2_5,
            pm2_5_atm: pm2_5,
            pm10_atm: pm2_5,
        }
    }

    #[test]
    fn clamps_bad_off_threshold_below_bad_on() {
        let cfg = AqmReaderConfig::new(35, 40, 75, 5, 25, false).unwrap();
        assert_eq!(cfg.bad_off_threshold, 34);
    }
}
