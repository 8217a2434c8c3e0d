//! The receiving side: accepting and acknowledging datagrams, and deciding when a transfer is
//!  complete.

pub mod reassembly;
pub mod receiver;
