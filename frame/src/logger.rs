// SPDX-License-Identifier: MPL-2.0

//! The `log` backend.
//!
//! Renders records with a level prefix to the early serial console. The
//! maximum level comes from the `loglevel=` kernel command-line argument
//! and defaults to `info`.

use log::{LevelFilter, Metadata, Record};

use crate::{boot, early_println};

static LOGGER: KernelLogger = KernelLogger;

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            early_println!("[{:>5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

pub(crate) fn init() {
    crate::console::init();
    let level = boot::kernel_cmdline()
        .loglevel()
        .map(parse_level)
        .unwrap_or(LevelFilter::Info);
    // A second registration can only happen if `init` is called twice;
    // losing the race is harmless.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

fn parse_level(s: &str) -> LevelFilter {
    match s {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_levels_fall_back_to_info() {
        assert_eq!(parse_level("verbose"), LevelFilter::Info);
        assert_eq!(parse_level("trace"), LevelFilter::Trace);
    }
}
