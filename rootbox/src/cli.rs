use std::env;
use std::ffi::CString;
use std::path::PathBuf;

use clap::{App, Arg};

use crate::filesystem::validation::{binding_validator, path_validator};
use crate::filesystem::FileSystem;

pub const DEFAULT_ROOTFS: &'static str = "/";
pub const DEFAULT_CWD: &'static str = "/";

/// Parsed command line: the initial filesystem namespace and the guest
/// command to launch.
pub struct Config {
    pub fs: FileSystem,
    pub command: Vec<CString>,
    pub kill_on_exit: bool,
}

pub fn parse_config() -> Result<Config, String> {
    let matches = App::new("rootbox")
        .version(clap::crate_version!())
        .about("chroot, mount --bind, and binfmt_misc without privilege")
        .arg(Arg::with_name("rootfs")
            .short("r")
            .long("rootfs")
            .help("Use *path* as the new guest root file-system.")
            .takes_value(true)
            .default_value(DEFAULT_ROOTFS)
            .validator(path_validator))
        .arg(Arg::with_name("bind")
            .short("b")
            .long("bind")
            .help("Make the content of *host_path* accessible in the guest rootfs. Format: host_path:guest_path")
            .multiple(true)
            .number_of_values(1)
            .takes_value(true)
            .validator(binding_validator))
        .arg(Arg::with_name("cwd")
            .short("w")
            .long("cwd")
            .help("Set the initial working directory to *path*.")
            .takes_value(true)
            .default_value(DEFAULT_CWD))
        .arg(Arg::with_name("verbose")
            .short("v")
            .long("verbose")
            .multiple(true)
            .help("Increase the verbosity (can be repeated)."))
        .arg(Arg::with_name("kill-on-exit")
            .long("kill-on-exit")
            .help("Kill all the remaining tracees when the first one exits."))
        .arg(Arg::with_name("command")
            .help("Guest command to run, with its arguments.")
            .multiple(true))
        .get_matches();

    initialize_logger(matches.occurrences_of("verbose"));

    let mut fs = FileSystem::new();

    // option -r: equivalent to -b *path*:/
    let rootfs: &str = matches.value_of("rootfs").unwrap();
    fs.set_root(rootfs)
        .map_err(|error| format!("invalid rootfs {:?}: {}", rootfs, error))?;

    // option(s) -b
    if let Some(bindings) = matches.values_of("bind") {
        for raw_binding in bindings {
            let parts: Vec<&str> = raw_binding.split_terminator(':').collect();
            let (host, guest) = match parts.len() {
                1 => (parts[0], parts[0]),
                _ => (parts[0], parts[1]),
            };
            fs.add_binding(host, guest)
                .map_err(|error| format!("invalid binding {:?}: {}", raw_binding, error))?;
        }
    }

    // option -w
    let cwd: &str = matches.value_of("cwd").unwrap();
    fs.set_cwd(PathBuf::from(cwd));

    let command = match matches.values_of("command") {
        Some(values) => values
            .map(|value| CString::new(value).map_err(|_| "nul byte in command".to_string()))
            .collect::<Result<Vec<CString>, String>>()?,
        None => vec![CString::new("/bin/sh").unwrap()],
    };

    Ok(Config {
        fs,
        command,
        kill_on_exit: matches.is_present("kill-on-exit"),
    })
}

/// Verbosity comes either from repeated `-v` flags or from the
/// `PROOT_VERBOSE` variable.
fn initialize_logger(verbose_occurrences: u64) {
    let level = match env::var("PROOT_VERBOSE") {
        Ok(value) => value.parse::<u64>().unwrap_or(0),
        Err(_) => verbose_occurrences,
    };

    let filter = match level {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    let _ = env_logger::Builder::from_default_env()
        .filter_level(filter)
        .try_init();
}
