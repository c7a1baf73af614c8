//! Fork-per-test execution.
//!
//! The child runs the test, writes the encoded outcome to a pipe and leaves
//! with `_exit`. A child killed by a signal becomes a `Crashed` outcome and the
//! parent moves on to the next test.

use super::TestOutcome;

const TAG_PASS: u8 = b'P';
const TAG_FAIL: u8 = b'F';
const TAG_FAIL_MESSAGE: u8 = b'M';
const TAG_SETUP: u8 = b'S';

pub(crate) fn encode(outcome: &TestOutcome) -> Vec<u8> {
    let (tag, text) = match outcome {
        TestOutcome::Pass => (TAG_PASS, None),
        TestOutcome::Fail(None) => (TAG_FAIL, None),
        TestOutcome::Fail(Some(msg)) => (TAG_FAIL_MESSAGE, Some(msg.as_str())),
        TestOutcome::SetupError(msg) => (TAG_SETUP, Some(msg.as_str())),
        // Only the parent observes crashes
        TestOutcome::Crashed(_) => (TAG_SETUP, Some("unexpected crash encoding")),
    };
    let mut out = vec![tag];
    if let Some(text) = text {
        out.extend_from_slice(text.as_bytes());
    }
    out
}

pub(crate) fn decode(bytes: &[u8]) -> Option<TestOutcome> {
    let (&tag, rest) = bytes.split_first()?;
    let text = || String::from_utf8_lossy(rest).into_owned();
    match tag {
        TAG_PASS => Some(TestOutcome::Pass),
        TAG_FAIL => Some(TestOutcome::Fail(None)),
        TAG_FAIL_MESSAGE => Some(TestOutcome::Fail(Some(text()))),
        TAG_SETUP => Some(TestOutcome::SetupError(text())),
        _ => None,
    }
}

/// Run `test` in a forked child and collect its outcome
#[cfg(unix)]
pub fn run_forked<F>(function: &str, test: F) -> TestOutcome
where
    F: FnOnce() -> TestOutcome,
{
    use std::fs::File;
    use std::io::{Read, Write};
    use std::os::fd::FromRawFd;

    use tracing::warn;

    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: fds has room for the two descriptors pipe() writes
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return TestOutcome::SetupError(format!(
            "pipe failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    // SAFETY: the child only runs the test on this thread, writes to the pipe
    // and calls _exit without returning into the parent's stack
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        let err = std::io::Error::last_os_error();
        // SAFETY: both descriptors came from pipe() above
        unsafe {
            libc::close(read_fd);
            libc::close(write_fd);
        }
        return TestOutcome::SetupError(format!("fork failed: {}", err));
    }

    if pid == 0 {
        // SAFETY: read_fd is ours; write_fd is owned by the File from here on
        unsafe { libc::close(read_fd) };
        let mut pipe = unsafe { File::from_raw_fd(write_fd) };
        // Unwinding must never leave the child
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(test))
            .unwrap_or_else(|_| TestOutcome::SetupError("test runner panicked".to_string()));
        let status = match pipe.write_all(&encode(&outcome)) {
            Ok(()) => 0,
            Err(_) => 1,
        };
        drop(pipe);
        // SAFETY: skips atexit handlers and destructors inherited from the parent
        unsafe { libc::_exit(status) };
    }

    // SAFETY: write_fd belongs to the child now; read_fd is owned by the File
    unsafe { libc::close(write_fd) };
    let mut pipe = unsafe { File::from_raw_fd(read_fd) };
    let mut bytes = Vec::new();
    let read = pipe.read_to_end(&mut bytes);

    let mut status: libc::c_int = 0;
    // SAFETY: pid is our direct child
    let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
    if waited < 0 {
        return TestOutcome::SetupError(format!(
            "waitpid failed: {}",
            std::io::Error::last_os_error()
        ));
    }

    if libc::WIFSIGNALED(status) {
        let signal = libc::WTERMSIG(status);
        warn!(
            target: "nativebridge::harness",
            function,
            signal,
            "Test process killed by signal"
        );
        return TestOutcome::Crashed(signal);
    }
    match (read, decode(&bytes)) {
        (Ok(_), Some(outcome)) => outcome,
        _ => TestOutcome::Fail(Some(format!(
            "test process exited with status {} without reporting",
            libc::WEXITSTATUS(status)
        ))),
    }
}
