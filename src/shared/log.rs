pub use log::Level;
use simple_logger::SimpleLogger;

/// Bootstrap logging for the crawler binaries. Everything is emitted at
/// Debug (with utc timestamps, since crawl versions are utc too) until
/// the configuration file has been parsed; the binaries then commit to
/// the configured level via [`apply_level`].
/// Panics if it's called more than one time.
pub fn init_log() {
    SimpleLogger::new()
        .with_level(Level::Debug.to_level_filter())
        .with_utc_timestamps()
        .init()
        .unwrap()
}

/// Switch to the level named by the configuration and record the switch,
/// so every crawl log states the level it ran at.
pub fn apply_level(lvl: Level) {
    log::set_max_level(lvl.to_level_filter());
    log::info!("Logging at {} level.", lvl);
}
