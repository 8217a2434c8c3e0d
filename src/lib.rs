pub mod cli;
pub mod compression;
pub mod config;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod transport;
pub mod util;
pub mod test_util;
