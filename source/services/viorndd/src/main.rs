// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: viorndd entry point
//! OWNERS: @runtime @security
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: See lib.rs
//!
//! Usage: `viorndd [CONFIG.toml]`. Without a path the built-in defaults apply.
//! `RUST_LOG` overrides `[log] level`.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process::ExitCode;

use log::error;
use viorndd::{service_main_loop, DaemonConfig, ReadyNotifier};

fn main() -> ExitCode {
    let mut args = std::env::args_os().skip(1);
    let path = args.next().map(PathBuf::from);
    let wants_help =
        path.as_deref().is_some_and(|p| p.as_os_str() == "--help" || p.as_os_str() == "-h");
    if wants_help || args.next().is_some() {
        eprintln!("usage: viorndd [CONFIG.toml]");
        return ExitCode::from(2);
    }

    let config = match DaemonConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("viorndd: {err}");
            return ExitCode::FAILURE;
        }
    };
    let level = match config.log_level() {
        Ok(level) => level,
        Err(err) => {
            eprintln!("viorndd: {err}");
            return ExitCode::FAILURE;
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.as_str()))
        .init();

    match service_main_loop(config, ReadyNotifier::new(|| log::info!("viorndd: ready"))) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("viorndd: {err}");
            ExitCode::FAILURE
        }
    }
}
