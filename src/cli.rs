use std::time::Duration;

use clap_derive::Args;

use crate::config::TransferConfig;
use crate::util::logging::init_logging;

/// Command line flags shared by both binaries. Timing flags are in milliseconds, and unset flags
///  keep the defaults of [TransferConfig].
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    #[clap(short, long, default_value_t = false)]
    pub verbose: bool,

    #[clap(long, default_value_t = false)]
    pub very_verbose: bool,

    #[clap(long)]
    pub max_datagram_size: Option<usize>,

    #[clap(long)]
    pub retry_interval_ms: Option<u64>,

    #[clap(long)]
    pub send_delay_ms: Option<u64>,

    #[clap(long)]
    pub fin_retry_interval_ms: Option<u64>,

    #[clap(long)]
    pub fin_grace_period_ms: Option<u64>,

    #[clap(long)]
    pub inactivity_timeout_ms: Option<u64>,

    #[clap(long)]
    pub fin_ack_repeats: Option<usize>,

    #[clap(long)]
    pub compression_level: Option<i32>,

    #[clap(long)]
    pub initial_sequence_id: Option<u32>,
}

impl CommonArgs {
    pub fn init_logging(&self) {
        init_logging(self.verbose, self.very_verbose);
    }

    pub fn apply(&self, config: &mut TransferConfig) {
        if let Some(size) = self.max_datagram_size {
            config.max_datagram_size = size;
        }
        if let Some(millis) = self.retry_interval_ms {
            config.retry_interval = Duration::from_millis(millis);
        }
        if let Some(millis) = self.send_delay_ms {
            config.send_delay = Some(Duration::from_millis(millis));
        }
        if let Some(millis) = self.fin_retry_interval_ms {
            config.fin_retry_interval = Duration::from_millis(millis);
        }
        if let Some(millis) = self.fin_grace_period_ms {
            config.fin_grace_period = Duration::from_millis(millis);
        }
        if let Some(millis) = self.inactivity_timeout_ms {
            config.inactivity_timeout = Duration::from_millis(millis);
        }
        if let Some(repeats) = self.fin_ack_repeats {
            config.fin_ack_repeats = repeats;
        }
        if let Some(level) = self.compression_level {
            config.compression_level = level;
        }
        if self.initial_sequence_id.is_some() {
            config.initial_sequence_id = self.initial_sequence_id;
        }
    }

    pub fn to_config(&self, mut config: TransferConfig) -> anyhow::Result<TransferConfig> {
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}
