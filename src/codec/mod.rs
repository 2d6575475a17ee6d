//! Codec module - byte order conversion for wire integers.
//!
//! The wire is big-endian regardless of the host. Conversions are done
//! byte by byte with shifts, never by reinterpreting host memory, so the
//! same code is correct on little- and big-endian hosts.
//!
//! # Example
//!
//! ```
//! use dmslite::codec::{u16_from_wire, u16_to_wire, u32_from_wire};
//!
//! assert_eq!(u16_to_wire(0x0102), [0x01, 0x02]);
//! assert_eq!(u16_from_wire([0x01, 0x02]), 0x0102);
//! assert_eq!(u32_from_wire([0, 0, 0, 200]), 200);
//! ```

mod endian;

pub use endian::{
    u16_from_wire, u16_to_wire, u32_from_wire, u32_to_wire, u64_from_wire, u64_to_wire,
};
