//! Exports configuration data from the build system

pub const STRONGBOX_PKG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION_MAJOR"),
    ".",
    env!("CARGO_PKG_VERSION_MINOR"),
);
pub const STRONGBOX_PKG_RELEASE: &str = env!("CARGO_PKG_VERSION_PATCH");
pub const STRONGBOX_PKG_REPOID: &str = env!("REPOID");

/// The configured configuration directory
pub const CONFIGDIR: &str = "/etc/strongbox";

/// Unix system user used to own datastore content
pub const BACKUP_USER_NAME: &str = "backup";
/// Unix system group used to own datastore content
pub const BACKUP_GROUP_NAME: &str = "backup";

#[macro_export]
macro_rules! STRONGBOX_RUN_DIR_M {
    () => {
        "/run/strongbox"
    };
}

#[macro_export]
macro_rules! STRONGBOX_STATE_DIR_M {
    () => {
        "/var/lib/strongbox"
    };
}

#[macro_export]
macro_rules! STRONGBOX_LOG_DIR_M {
    () => {
        "/var/log/strongbox"
    };
}

/// namespaced directory for in-memory (tmpfs) run state
pub const STRONGBOX_RUN_DIR: &str = STRONGBOX_RUN_DIR_M!();

/// namespaced directory for persistent state
pub const STRONGBOX_STATE_DIR: &str = STRONGBOX_STATE_DIR_M!();

/// namespaced directory for persistent logging
pub const STRONGBOX_LOG_DIR: &str = STRONGBOX_LOG_DIR_M!();

/// Prepend configuration directory to a file name
///
/// #### Example:
/// ```
/// use strongbox_buildcfg::configdir;
/// let cert_path = configdir!("/proxy.pfx");
/// ```
#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => {
        concat!("/etc/strongbox", $subdir)
    };
}

/// Prepend the run directory to a file name.
#[macro_export]
macro_rules! rundir {
    ($subdir:expr) => {
        concat!($crate::STRONGBOX_RUN_DIR_M!(), $subdir)
    };
}
