//! Credential helpers applied to service children between fork and exec.

use std::io;

use nix::unistd::{Group, User};

use crate::config::ServiceConfig;

/// Normalised credential plan derived from a `ServiceConfig` prior to
/// spawn: uid/gid resolved from account names, plus the effective umask
/// (service override falling back to the supervisor-wide mask).
#[derive(Debug, Clone, Default)]
pub struct ChildCredentials {
    uid: Option<libc::uid_t>,
    gid: Option<libc::gid_t>,
    umask: Option<libc::mode_t>,
}

impl ChildCredentials {
    /// Resolves account names against the system user database. Runs in
    /// the parent: name lookups are not async-signal-safe after fork.
    pub fn resolve(
        service: &ServiceConfig,
        global_umask: Option<u32>,
    ) -> io::Result<Self> {
        let mut creds = ChildCredentials {
            umask: service
                .umask
                .or(global_umask)
                .map(|mask| mask as libc::mode_t),
            ..ChildCredentials::default()
        };

        if let Some(user_name) = &service.user {
            let user = User::from_name(user_name)
                .map_err(|err| io::Error::other(err.to_string()))?
                .ok_or_else(|| io::Error::other(format!("user '{user_name}' not found")))?;
            creds.uid = Some(user.uid.as_raw());
            creds.gid = Some(user.gid.as_raw());
        }

        if let Some(group_name) = &service.group {
            let group = Group::from_name(group_name)
                .map_err(|err| io::Error::other(err.to_string()))?
                .ok_or_else(|| {
                    io::Error::other(format!("group '{group_name}' not found"))
                })?;
            creds.gid = Some(group.gid.as_raw());
        }

        Ok(creds)
    }

    /// True when exec needs no credential adjustments at all.
    pub fn is_noop(&self) -> bool {
        self.uid.is_none() && self.gid.is_none() && self.umask.is_none()
    }

    /// Applies the credential plan inside the child process.
    ///
    /// # Safety
    /// Call this only between `fork` and `exec` in the child. The gid
    /// switch must precede the uid switch: once the uid drops, the
    /// process may no longer have permission to change groups.
    pub unsafe fn apply(&self) -> io::Result<()> {
        if let Some(gid) = self.gid
            && unsafe { libc::setgid(gid) } != 0
        {
            return Err(io::Error::last_os_error());
        }

        if let Some(uid) = self.uid
            && unsafe { libc::setuid(uid) } != 0
        {
            return Err(io::Error::last_os_error());
        }

        if let Some(mask) = self.umask {
            unsafe {
                libc::umask(mask);
            }
        }

        Ok(())
    }
}
