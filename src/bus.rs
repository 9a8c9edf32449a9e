//! Internal publish/subscribe event bus.
//!
//! The original implementation passes a free-form `dict` of keyword data
//! alongside a string type tag. Here each category of event is its own
//! tagged variant with fixed fields, so subscribers match exhaustively
//! instead of probing a map.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::pubsub::{PubSubChannel, PublishError, Subscriber, WaitResult};
use embassy_time::Instant;

/// Tool identifiers recognized by the ADC watcher, gate controllers and the
/// collector aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToolId {
    Saw,
    Lathe,
}

/// Edge published by the ADC watcher for a tool channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToolEdge {
    On,
    Off,
}

/// Filtered air-quality reading, published on every valid frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AqmMetrics {
    pub pm1_0: u16,
    pub pm2_5: u16,
    pub pm10: u16,
    pub filter_window: usize,
}

/// `is_bad` hysteresis transition, published only on state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AqmTransition {
    pub is_bad: bool,
    pub pm2_5: u16,
    pub severe: bool,
}

/// A single bus event, timestamped at publication.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    Tool {
        tool: ToolId,
        edge: ToolEdge,
        voltage: f32,
    },
    AqmMetrics(AqmMetrics),
    AqmTransition(AqmTransition),
}

impl Event {
    pub fn tool(tool: ToolId, edge: ToolEdge, voltage: f32) -> TimestampedEvent {
        TimestampedEvent {
            event: Event::Tool { tool, edge, voltage },
            ts: Instant::now(),
        }
    }

    pub fn aqm_metrics(metrics: AqmMetrics) -> TimestampedEvent {
        TimestampedEvent {
            event: Event::AqmMetrics(metrics),
            ts: Instant::now(),
        }
    }

    pub fn aqm_transition(transition: AqmTransition) -> TimestampedEvent {
        TimestampedEvent {
            event: Event::AqmTransition(transition),
            ts: Instant::now(),
        }
    }
}

/// `Event` plus the monotonic instant it was published at.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimestampedEvent {
    pub event: Event,
    pub ts: Instant,
}

/// Bus capacity knobs. `CAP` bounds how many unread events a single
/// subscriber can fall behind by before a new publish is dropped for it;
/// `SUBS` bounds the number of concurrent subscribers; `PUBS` the number of
/// concurrent publishers.
pub struct EventBus<M: RawMutex, const CAP: usize, const SUBS: usize, const PUBS: usize> {
    channel: PubSubChannel<M, TimestampedEvent, CAP, SUBS, PUBS>,
}

impl<M: RawMutex, const CAP: usize, const SUBS: usize, const PUBS: usize>
    EventBus<M, CAP, SUBS, PUBS>
{
    pub const fn new() -> Self {
        Self {
            channel: PubSubChannel::new(),
        }
    }

    /// Register a new subscriber. Panics only if the bus's fixed subscriber
    /// capacity (`SUBS`) is already exhausted, which indicates a
    /// configuration error (too many components wired to one bus instance).
    pub fn subscribe(&self) -> Subscriber<'_, M, TimestampedEvent, CAP, SUBS, PUBS> {
        self.channel
            .subscriber()
            .expect("event bus subscriber capacity exceeded")
    }

    /// Publish an event to every current subscriber. If the channel is
    /// already full for a subscriber, this event is dropped for that
    /// subscriber rather than evicting an older, already-queued one; this
    /// never blocks the publisher.
    pub fn publish(&self, event: TimestampedEvent) {
        if self.try_publish(event).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("event bus full, dropping event");
        }
    }

    /// Attempt publication, surfacing whether the channel was already full
    /// for this event instead of silently dropping it.
    pub fn try_publish(&self, event: TimestampedEvent) -> Result<(), PublishError<TimestampedEvent>> {
        self.channel.try_publish(event)
    }
}

/// Convenience helper mirroring `await q.get()` in the original source: wait
/// for the next event, silently skipping gaps reported by a lagged
/// subscriber (the bus has already logged the drop at publish time).
pub async fn next_event<M: RawMutex, const CAP: usize, const SUBS: usize, const PUBS: usize>(
    sub: &mut Subscriber<'_, M, TimestampedEvent, CAP, SUBS, PUBS>,
) -> TimestampedEvent {
    loop {
        match sub.next_message().await {
            WaitResult::Message(event) => return event,
            WaitResult::Lagged(_count) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("event bus subscriber lagged, events dropped");
                continue;
            }
        }
    }
}
