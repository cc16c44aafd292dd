//! Protocol definitions for Pebblebee devices.
//!
//! This module contains the low-level protocol pieces:
//! - Binary field helpers
//! - GATT identifiers
//! - Advertisement decoding
//! - Command payloads and response parsing

pub mod advertisement;
pub mod codec;
pub mod command;
pub mod uuids;

pub use advertisement::{Advertisement, decode_battery, decode_identity, decode_state};
pub use command::{CellularQuery, CommandKind, DeviceCommand, EncodedWrite, QueryResponse};
