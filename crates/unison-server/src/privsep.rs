//! Privilege separation bootstrap.
//!
//! The server starts as root only so it can bind its port. Before the reactor
//! serves any traffic it gives that up for good:
//!
//! 1. resolve the target account (the passwd database is gone after step 2)
//! 2. `chroot` into an empty directory and `chdir("/")`
//! 3. drop supplementary groups, then the gid, then the uid
//! 4. check that `setuid(0)` now fails
//! 5. install a seccomp allow-list covering what the event loop needs
//!
//! Every step is fatal on failure. There is no partially-dropped mode.

use std::{io, path::PathBuf};

/// Default unprivileged account.
pub const DEFAULT_USER: &str = "unison";

/// Default confinement root.
pub const DEFAULT_CHROOT: &str = "/var/empty";

/// Privilege drop configuration.
#[derive(Debug, Clone)]
pub struct PrivsepConfig {
    /// Account to switch to
    pub user: String,
    /// Directory that becomes `/`
    pub chroot: PathBuf,
}

impl Default for PrivsepConfig {
    fn default() -> Self {
        Self { user: DEFAULT_USER.to_string(), chroot: PathBuf::from(DEFAULT_CHROOT) }
    }
}

/// Privilege separation failures.
#[derive(Debug, thiserror::Error)]
pub enum PrivsepError {
    /// Started without root.
    #[error("this program must be run as root")]
    NotRoot,

    /// Target account does not exist.
    #[error("unknown user {0:?}")]
    UnknownUser(String),

    /// Account database lookup failed.
    #[error("looking up user {user:?} failed: {source}")]
    UserLookup {
        /// Requested account
        user: String,
        /// Underlying OS error
        source: io::Error,
    },

    /// `chroot` failed.
    #[error("chroot to {path} failed: {source}")]
    Chroot {
        /// Confinement root
        path: PathBuf,
        /// Underlying OS error
        source: io::Error,
    },

    /// `chdir("/")` after `chroot` failed.
    #[error("chdir to new root failed: {0}")]
    Chdir(#[source] io::Error),

    /// Dropping supplementary groups failed.
    #[error("dropping supplementary groups failed: {0}")]
    SetGroups(#[source] io::Error),

    /// Switching group id failed.
    #[error("setresgid failed: {0}")]
    SetGid(#[source] io::Error),

    /// Switching user id failed.
    #[error("setresuid failed: {0}")]
    SetUid(#[source] io::Error),

    /// Root could be regained after the drop.
    #[error("privileges were not dropped: setuid(0) still succeeds")]
    PrivilegeRetained,

    /// Building or installing the syscall filter failed.
    #[error("seccomp filter failed: {0}")]
    Seccomp(String),

    /// Not available on this platform.
    #[error("privilege separation is not supported on this platform")]
    Unsupported,
}

#[cfg(target_os = "linux")]
pub use self::linux::{allowed_syscalls, drop_privileges, install_seccomp, require_root};

#[cfg(target_os = "linux")]
mod linux {
    use std::{collections::BTreeMap, io, path::Path};

    use nix::{
        errno::Errno,
        unistd::{self, User},
    };
    use seccompiler::{BpfProgram, SeccompAction, SeccompFilter, SeccompRule, TargetArch};

    use super::{PrivsepConfig, PrivsepError};

    fn os_error(errno: Errno) -> io::Error {
        io::Error::from(errno)
    }

    /// Fail unless the real uid is 0.
    pub fn require_root() -> Result<(), PrivsepError> {
        if unistd::getuid().is_root() { Ok(()) } else { Err(PrivsepError::NotRoot) }
    }

    pub(super) fn lookup_user(name: &str) -> Result<User, PrivsepError> {
        User::from_name(name)
            .map_err(|errno| PrivsepError::UserLookup {
                user: name.to_string(),
                source: os_error(errno),
            })?
            .ok_or_else(|| PrivsepError::UnknownUser(name.to_string()))
    }

    fn confine(path: &Path) -> Result<(), PrivsepError> {
        unistd::chroot(path).map_err(|errno| PrivsepError::Chroot {
            path: path.to_path_buf(),
            source: os_error(errno),
        })?;
        unistd::chdir("/").map_err(|errno| PrivsepError::Chdir(os_error(errno)))
    }

    /// Switch to `config.user` inside `config.chroot`.
    ///
    /// Must run after the listener is bound and before any client is served.
    pub fn drop_privileges(config: &PrivsepConfig) -> Result<(), PrivsepError> {
        let user = lookup_user(&config.user)?;
        confine(&config.chroot)?;

        unistd::setgroups(&[]).map_err(|errno| PrivsepError::SetGroups(os_error(errno)))?;
        unistd::setresgid(user.gid, user.gid, user.gid)
            .map_err(|errno| PrivsepError::SetGid(os_error(errno)))?;
        unistd::setresuid(user.uid, user.uid, user.uid)
            .map_err(|errno| PrivsepError::SetUid(os_error(errno)))?;

        if unistd::setuid(unistd::Uid::from_raw(0)).is_ok() {
            return Err(PrivsepError::PrivilegeRetained);
        }

        tracing::info!(
            user = %config.user,
            uid = user.uid.as_raw(),
            gid = user.gid.as_raw(),
            chroot = %config.chroot.display(),
            "dropped privileges"
        );
        Ok(())
    }

    /// Syscalls the event loop may make once confined.
    pub fn allowed_syscalls() -> Vec<(&'static str, i64)> {
        #[cfg_attr(not(target_arch = "x86_64"), allow(unused_mut))]
        let mut calls = vec![
            ("read", i64::from(libc::SYS_read)),
            ("recvfrom", i64::from(libc::SYS_recvfrom)),
            ("write", i64::from(libc::SYS_write)),
            ("writev", i64::from(libc::SYS_writev)),
            ("sendto", i64::from(libc::SYS_sendto)),
            ("accept4", i64::from(libc::SYS_accept4)),
            ("close", i64::from(libc::SYS_close)),
            ("epoll_ctl", i64::from(libc::SYS_epoll_ctl)),
            ("epoll_pwait", i64::from(libc::SYS_epoll_pwait)),
            ("brk", i64::from(libc::SYS_brk)),
            ("mmap", i64::from(libc::SYS_mmap)),
            ("munmap", i64::from(libc::SYS_munmap)),
            ("mremap", i64::from(libc::SYS_mremap)),
            ("madvise", i64::from(libc::SYS_madvise)),
            ("exit", i64::from(libc::SYS_exit)),
            ("exit_group", i64::from(libc::SYS_exit_group)),
            ("rt_sigreturn", i64::from(libc::SYS_rt_sigreturn)),
            ("sigaltstack", i64::from(libc::SYS_sigaltstack)),
            ("clock_gettime", i64::from(libc::SYS_clock_gettime)),
            ("futex", i64::from(libc::SYS_futex)),
            ("getrandom", i64::from(libc::SYS_getrandom)),
        ];

        #[cfg(target_arch = "x86_64")]
        calls.push(("epoll_wait", i64::from(libc::SYS_epoll_wait)));

        calls
    }

    pub(super) fn seccomp_program() -> Result<BpfProgram, PrivsepError> {
        let arch = TargetArch::try_from(std::env::consts::ARCH)
            .map_err(|e| PrivsepError::Seccomp(format!("{e:?}")))?;

        let rules: BTreeMap<i64, Vec<SeccompRule>> =
            allowed_syscalls().into_iter().map(|(_, nr)| (nr, Vec::new())).collect();

        let filter = SeccompFilter::new(rules, SeccompAction::Trap, SeccompAction::Allow, arch)
            .map_err(|e| PrivsepError::Seccomp(format!("{e:?}")))?;

        BpfProgram::try_from(filter).map_err(|e| PrivsepError::Seccomp(format!("{e:?}")))
    }

    /// Compile and install the allow-list. Irreversible.
    pub fn install_seccomp() -> Result<(), PrivsepError> {
        let program = seccomp_program()?;
        seccompiler::apply_filter(&program).map_err(|e| PrivsepError::Seccomp(format!("{e:?}")))?;

        tracing::info!(syscalls = allowed_syscalls().len(), "installed seccomp filter");
        Ok(())
    }
}

/// Fail unless the real uid is 0.
#[cfg(not(target_os = "linux"))]
pub fn require_root() -> Result<(), PrivsepError> {
    Err(PrivsepError::Unsupported)
}

/// Switch to `config.user` inside `config.chroot`.
#[cfg(not(target_os = "linux"))]
pub fn drop_privileges(_config: &PrivsepConfig) -> Result<(), PrivsepError> {
    Err(PrivsepError::Unsupported)
}

/// Compile and install the allow-list.
#[cfg(not(target_os = "linux"))]
pub fn install_seccomp() -> Result<(), PrivsepError> {
    Err(PrivsepError::Unsupported)
}
