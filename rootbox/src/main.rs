#![allow(clippy::redundant_static_lifetimes)]
#![allow(clippy::redundant_field_names)]

extern crate clap;
extern crate libc;
extern crate nix;
extern crate sc;
#[macro_use]
extern crate lazy_static;
extern crate bstr;
extern crate byteorder;
#[macro_use]
extern crate log;
extern crate env_logger;

mod arch;
mod cli;
mod errors;
mod filesystem;
mod kernel;
mod process;
mod register;
mod utils;

use std::process::exit;

use crate::filesystem::{glue, Initialiser};
use crate::process::proot::{show_info, stop_program, PRoot};
use crate::process::sigactions;

fn main() {
    // step 1: CLI parsing
    let mut config = match cli::parse_config() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("rootbox error: {}", error);
            exit(1);
        }
    };

    if let Err(error) = config.fs.initialize() {
        eprintln!("rootbox error: file system initialization failed: {}", error);
        exit(1);
    }

    let proot = PRoot::new();
    proot.set_kill_on_exit(config.kill_on_exit);

    // step 2: start the first tracee
    if let Err(error) = proot.launch_process(config.fs, &config.command) {
        eprintln!("rootbox error: can't launch the guest command: {}", error);
        exit(1);
    }

    // step 3: configure the signal actions; the event loop only runs in
    // the tracer, the child never returns from launch_process.
    sigactions::prepare_sigactions(stop_program, show_info);

    // step 4: listen to and deal with tracee events
    proot.event_loop();

    // The placeholders written into the guest rootfs by the glue are only
    // meaningful while the tracer runs.
    glue::remove_placeholders();

    // Our exit status mirrors the last terminated tracee's.
    exit(proot.get_exit_status());
}
