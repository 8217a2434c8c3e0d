pub mod logging;
pub mod random;
pub mod timer;
