//! Shared scaffolding for the demo binaries.

use std::io::Write;
use std::str::FromStr;

/// Installs the demo log format: `HH:MM:SS.mmm LEVEL target: message`.
pub fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = log::LevelFilter::from_str(level)?;
    env_logger::Builder::new()
        .filter_level(filter)
        .format(|out, record| {
            let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
            writeln!(
                out,
                "{stamp} {level:<5} {target}: {message}",
                level = record.level(),
                target = record.target(),
                message = record.args(),
            )
        })
        .init();
    Ok(())
}
