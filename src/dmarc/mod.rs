//! The DMARC aggregate report grammar (RFC 7489 appendix C).

pub mod decode;
pub mod help;
pub mod raw;
pub mod types;

pub use decode::{from_reader, from_slice};
pub use types::*;
