use nix::sys::wait::WaitStatus;

/// Translate a `waitpid` status into the shell-convention exit code: the
/// process's own code on a normal exit, `128 + signum` on signal death.
pub fn from_wait_status(status: WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, sig, _) => 128 + sig as i32,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    #[test]
    fn exited_returns_code() {
        let status = WaitStatus::Exited(Pid::from_raw(1), 7);
        assert_eq!(from_wait_status(status), 7);
    }

    #[test]
    fn signaled_adds_128() {
        let status = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGKILL, false);
        assert_eq!(from_wait_status(status), 128 + Signal::SIGKILL as i32);
    }
}
