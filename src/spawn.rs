//! Child process spawning and exit watching.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;

use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::privilege::ChildCredentials;
use crate::supervisor::Event;

/// Spawns a service child through the platform shell so shell syntax in
/// the command works. Credentials and umask are applied in the child
/// between fork and exec; the supervisor's own umask is never touched.
pub(crate) fn spawn_service(
    service: &ServiceConfig,
    creds: ChildCredentials,
) -> io::Result<u32> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&service.cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    if !creds.is_noop() {
        unsafe {
            cmd.pre_exec(move || unsafe { creds.apply() });
        }
    }

    let child = cmd.spawn()?;
    Ok(child.id())
}

/// Watches one spawned pid from a dedicated thread and reports its exit
/// back to the supervisor loop. Each pid is reaped exactly once; a
/// signal death records exit code 0.
pub(crate) fn watch_child(service: String, pid: u32, events: mpsc::Sender<Event>) {
    thread::spawn(move || {
        let target = Pid::from_raw(pid as i32);
        let code = loop {
            match waitpid(target, None) {
                Ok(WaitStatus::Exited(_, code)) => break code,
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    debug!(service = %service, pid, ?signal, "child killed by signal");
                    break 0;
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(err) => {
                    // ECHILD: already reaped elsewhere.
                    debug!(service = %service, pid, %err, "waitpid failed");
                    break 0;
                }
            }
        };

        let _ = events.send(Event::ChildExit {
            service,
            pid,
            code,
        });
    });
}
