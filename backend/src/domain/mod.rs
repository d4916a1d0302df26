//! Domain types, services, and ports.
//!
//! Everything here is framework-free: HTTP, Diesel, and Redis concerns live
//! in the adapter layers and reach the domain only through the traits in
//! [`ports`].

pub mod bootstrap;
pub mod change;
pub mod device;
pub mod error;
pub mod gate;
pub mod maintenance;
pub mod note;
pub mod ports;
pub mod sync;
pub mod ticket;
pub mod user;

pub use change::{Change, ChangeOp, CursorWindow};
pub use device::{adopt_device_id, describe_user_agent, AdoptedDeviceId, Device, DeviceId};
pub use error::{Error, ErrorCode};
pub use note::{changed_fields, Note, NotePriority, NoteType, CONFLICT_FIELD_WHITELIST, MAX_TAGS};
pub use user::{ExternalUserId, UserId};
