//! Actix middleware shared by every route.

mod device_echo;
mod trace;

pub use device_echo::{DeviceEcho, EchoDeviceId, DEVICE_ID_HEADER};
pub use trace::{RequestTrace, TraceId, REQUEST_ID_HEADER};
