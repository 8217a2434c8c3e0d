//! Test utilities: an in-memory datagram network with configurable faults

pub mod network;
