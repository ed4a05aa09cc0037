// SPDX-License-Identifier: MPL-2.0

//! The module to parse kernel command-line arguments.
//!
//! The accepted format is a whitespace-separated list of `entry` or
//! `entry=value` words. Everything after a `--` word belongs to the init
//! process.

use alloc::{
    string::{String, ToString},
    vec::Vec,
};

/// The struct to store the parsed kernel command-line arguments.
#[derive(Debug, Default)]
pub struct KCmdlineArg {
    initproc_path: Option<String>,
    initproc_argv: Vec<String>,
    loglevel: Option<String>,
}

impl KCmdlineArg {
    /// Gets the path of the init process.
    pub fn initproc_path(&self) -> Option<&str> {
        self.initproc_path.as_deref()
    }

    /// Gets the argument vector of the init process.
    pub fn initproc_argv(&self) -> &[String] {
        &self.initproc_argv
    }

    /// Gets the requested log level, if any.
    pub fn loglevel(&self) -> Option<&str> {
        self.loglevel.as_deref()
    }
}

impl From<&str> for KCmdlineArg {
    fn from(cmdline: &str) -> Self {
        let mut result = KCmdlineArg::default();
        let mut kcmdline_end = false;

        for word in cmdline.split_whitespace() {
            if kcmdline_end {
                result.initproc_argv.push(word.to_string());
                continue;
            }
            if word == "--" {
                kcmdline_end = true;
                continue;
            }
            let (entry, value) = match word.split_once('=') {
                Some((e, v)) => (e, Some(v)),
                None => (word, None),
            };
            match entry {
                "init" => {
                    if let Some(path) = value {
                        result.initproc_path = Some(path.to_string());
                    }
                }
                "loglevel" => {
                    if let Some(level) = value {
                        result.loglevel = Some(level.to_string());
                    }
                }
                // Unknown words are tolerated; the loader and firmware
                // are free to append their own.
                _ => log::debug!("unknown cmdline argument: {}", word),
            }
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_known_entries() {
        let args = KCmdlineArg::from("loglevel=debug init=/sbin/init");
        assert_eq!(args.loglevel(), Some("debug"));
        assert_eq!(args.initproc_path(), Some("/sbin/init"));
    }

    #[test]
    fn words_after_double_dash_go_to_init() {
        let args = KCmdlineArg::from("init=/bin/sh -- -l -c");
        assert_eq!(args.initproc_argv(), &["-l".to_string(), "-c".to_string()]);
    }

    #[test]
    fn empty_cmdline_is_fine() {
        let args = KCmdlineArg::from("");
        assert!(args.initproc_path().is_none());
        assert!(args.loglevel().is_none());
    }
}
