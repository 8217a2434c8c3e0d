//! The sending side: splitting compressed input into datagrams and re-sending them until each
//!  one is acknowledged.

pub mod scheduler;
pub mod sender;
