//! Logging bootstrap. Every component logs through the `log` facade; this
//! module just wires up `env_logger` once, idempotently, so tests and the
//! CLI can call it freely without double-installing a logger.

use env_logger::Builder;
use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Idempotent; safe to call from every test module's setup routine and from
/// the demo binary's `main`.
pub fn init_log() {
    INIT.call_once(|| {
        let mut builder = Builder::from_default_env();
        builder
            .format_timestamp_micros()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} - {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .is_test(false)
            .try_init()
            .ok();
    });
}
