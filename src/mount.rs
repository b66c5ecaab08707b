//! FUSE mount options
//!
//! Builds the option list handed to `fuser::mount2` from the mount
//! configuration and any `-o` strings given on the command line.

use crate::config::MountConfig;
use fuser::MountOption;

/// Parse a single `-o` style option
pub fn parse_option(option: &str) -> MountOption {
    match option {
        "ro" => MountOption::RO,
        "rw" => MountOption::RW,
        "allow_other" => MountOption::AllowOther,
        "allow_root" => MountOption::AllowRoot,
        "auto_unmount" => MountOption::AutoUnmount,
        "default_permissions" => MountOption::DefaultPermissions,
        "dev" => MountOption::Dev,
        "nodev" => MountOption::NoDev,
        "suid" => MountOption::Suid,
        "nosuid" => MountOption::NoSuid,
        "exec" => MountOption::Exec,
        "noexec" => MountOption::NoExec,
        "atime" => MountOption::Atime,
        "noatime" => MountOption::NoAtime,
        "sync" => MountOption::Sync,
        "async" => MountOption::Async,
        "dirsync" => MountOption::DirSync,
        _ => {
            if let Some(name) = option.strip_prefix("fsname=") {
                MountOption::FSName(name.to_string())
            } else if let Some(subtype) = option.strip_prefix("subtype=") {
                MountOption::Subtype(subtype.to_string())
            } else {
                MountOption::CUSTOM(option.to_string())
            }
        }
    }
}

/// Split comma separated option strings, dropping empty pieces
pub fn split_options<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    raw.into_iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Full option list for a mount
///
/// Kernel permission checks are always enabled since every request is
/// served with the daemon's own credentials.
pub fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![
        MountOption::FSName(config.fsname.clone()),
        MountOption::DefaultPermissions,
    ];

    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.allow_root {
        options.push(MountOption::AllowRoot);
    }
    if config.read_only {
        options.push(MountOption::RO);
    }

    for raw in split_options(config.options.iter().map(String::as_str)) {
        let option = parse_option(&raw);
        if let MountOption::FSName(_) = option {
            options.retain(|o| !matches!(o, MountOption::FSName(_)));
        }
        if !options.contains(&option) {
            options.push(option);
        }
    }

    options
}
