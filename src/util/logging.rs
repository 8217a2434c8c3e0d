use tracing::Level;

/// Installs the process-wide tracing subscriber. Logs go to stderr, keeping stdout free for
///  transferred data.
pub fn init_logging(verbose: bool, very_verbose: bool) {
    let level = match (verbose, very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .try_init()
        .ok();
}
