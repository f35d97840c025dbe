//! Command line driver for the vatslots virtual object layer.
//!
//! Runs one of a handful of scripted scenarios against an in-memory store
//! and prints, per delivery, the store traffic (with `--log-store`), the GC
//! syscalls owed to the kernel and the identities retired. `-v` turns on
//! debug logging; `RUST_LOG` works as usual.

#[macro_use]
extern crate log;

mod scenarios;
mod settings;

pub use vatslots_vm as vm;

use settings::RunMode;

pub fn run() -> ! {
    let (settings, mode, verbose) = settings::opts_with_clap();
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let code = match mode {
        RunMode::List => {
            for scenario in scenarios::ALL {
                println!("{:<14} {}", scenario.name, scenario.about);
            }
            0
        }
        RunMode::Scenario(name) => match scenarios::find(&name) {
            None => {
                error!("no scenario named {name:?}, try --list");
                2
            }
            Some(scenario) => match scenarios::run(scenario, settings) {
                Ok(()) => 0,
                Err(err) => {
                    error!("{} failed: {err}", scenario.name);
                    1
                }
            },
        },
    };
    std::process::exit(code)
}
