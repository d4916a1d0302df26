//! Real-time fan-out: process-local broadcast with distributed bridging.

mod hub;

pub use hub::{
    DegradedReason, FanoutChannel, HubStatusSnapshot, RealtimeHub, SubscriberLifecycle,
    SyncEvent, SYNC_EVENT_CHANNEL,
};
