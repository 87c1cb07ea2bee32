use crate::error::LaunchError;
use chrono::Local;
use fern::colors::{Color, ColoredLevelConfig};
use fern::Dispatch;
use log::LevelFilter;
use std::env;
use std::io;

pub const LOG_ENV: &str = "RPCWEB_LOG";

pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn parse_level(value: &str) -> Option<LevelFilter> {
    value.trim().parse::<LevelFilter>().ok()
}

pub fn init(verbose: u8) -> Result<(), LaunchError> {
    let level = env::var(LOG_ENV)
        .ok()
        .and_then(|value| parse_level(&value))
        .unwrap_or_else(|| level_for_verbosity(verbose));

    let colors = ColoredLevelConfig::new()
        .debug(Color::Blue)
        .info(Color::Green)
        .warn(Color::Yellow)
        .error(Color::Red)
        .trace(Color::Magenta);

    // Dependencies (tiny_http, reqwest) only get through at warn.
    Dispatch::new()
        .level(level.min(LevelFilter::Warn))
        .level_for(env!("CARGO_CRATE_NAME"), level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(io::stderr())
        .apply()?;
    Ok(())
}
