// Liveness probe: a cheap existence check, separate from full status reads

use crate::process::control::ProcessControl;
use nix::errno::Errno;

/// Whether the process held by `control` still exists.
///
/// Sends the null signal. Only "no such process" counts as dead; any other
/// failure (EPERM on a process owned by another user, for instance) does not
/// prove the process is gone, so it is reported alive.
pub fn is_alive<C: ProcessControl + ?Sized>(control: &C) -> bool {
    if control.pid().is_none() {
        return false;
    }
    interpret_probe(control.signal(None))
}

/// Map the result of a null-signal probe to alive / not alive
pub fn interpret_probe(result: nix::Result<()>) -> bool {
    !matches!(result, Err(Errno::ESRCH))
}
