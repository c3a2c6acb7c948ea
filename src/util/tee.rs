use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::thread::{self, JoinHandle};

/// Spawn a thread that copies every byte read from `read_fd` to both the
/// terminal and the log file, for non-tty foreground runs where the user
/// wants to watch the container's output live while it is also persisted.
pub fn spawn_tee(read_fd: RawFd, mut terminal: impl Write + Send + 'static, mut log_file: File) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = unsafe { File::from_raw_fd(read_fd) };
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = terminal.write_all(&buf[..n]);
                    let _ = log_file.write_all(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}
