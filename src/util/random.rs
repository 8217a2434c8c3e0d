use rand::RngCore;

/// Source of randomness for protocol values, abstracted for deterministic tests
#[cfg_attr(test, mockall::automock)]
pub trait Random {
    fn next_u32() -> u32;
}

pub struct RngRandom {}
impl Random for RngRandom {
    fn next_u32() -> u32 {
        rand::thread_rng().next_u32()
    }
}

/// Picks the sender's first sequence id: the configured one, or a random one
pub fn initial_sequence_id<R: Random>(configured: Option<u32>) -> u32 {
    configured.unwrap_or_else(R::next_u32)
}
