// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Local stdin/stdout/stderr for a session.
//!
//! Stdin is read without ever blocking the relay loop; a read with nothing
//! available fails with [`io::ErrorKind::WouldBlock`]. Stdout and stderr are
//! kept blocking, and [`write_output`] bounds how long a stalled writer can
//! hold up the loop.

use std::io::{self, Write};
use std::time::Duration;

use tracing::{debug, warn};

use super::constants::{
    CHANNEL_BUFFER_SIZE, DEFAULT_WRITE_BACKOFF_MS, DEFAULT_WRITE_RETRY_LIMIT, MAX_WRITE_BACKOFF_MS,
};
use super::error::{classify_io_error, IoDisposition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// The local side of a session's byte streams.
pub trait LocalStdio: Send {
    /// Make stdin non-blocking for the relay and stdout/stderr blocking.
    fn prepare(&mut self) -> io::Result<()>;

    /// Undo [`LocalStdio::prepare`]. Later calls do nothing.
    fn restore(&mut self) -> io::Result<()>;

    /// Read available input. `Ok(0)` means end of input.
    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn write_output(&mut self, stream: OutputStream, data: &[u8]) -> io::Result<usize>;

    fn flush_output(&mut self, stream: OutputStream) -> io::Result<()>;
}

/// Retry policy for local writes that report would-block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    pub retry_limit: u32,
    pub backoff: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_WRITE_RETRY_LIMIT,
            backoff: Duration::from_millis(DEFAULT_WRITE_BACKOFF_MS),
        }
    }
}

impl WritePolicy {
    async fn pause(&self, attempt: u32) {
        if self.backoff.is_zero() {
            tokio::task::yield_now().await;
            return;
        }
        let delay = self
            .backoff
            .saturating_mul(attempt)
            .min(Duration::from_millis(MAX_WRITE_BACKOFF_MS));
        tokio::time::sleep(delay).await;
    }
}

/// Write `data` to a local stream in chunks no larger than the channel buffer.
///
/// Would-block results are retried up to the policy's limit per chunk; when
/// the limit is reached the rest of the data is dropped with a warning.
/// Returns the number of bytes actually written. Session-ending and fatal
/// errors are returned to the caller.
pub async fn write_output<S>(
    stdio: &mut S,
    stream: OutputStream,
    data: &[u8],
    policy: &WritePolicy,
) -> io::Result<usize>
where
    S: LocalStdio + ?Sized,
{
    let mut written = 0;

    for chunk in data.chunks(CHANNEL_BUFFER_SIZE) {
        let mut offset = 0;
        let mut retries = 0;

        while offset < chunk.len() {
            match stdio.write_output(stream, &chunk[offset..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "local output stream accepted no data",
                    ))
                }
                Ok(n) => {
                    offset += n;
                    written += n;
                    retries = 0;
                }
                Err(e) if classify_io_error(&e) == IoDisposition::WouldBlock => {
                    if retries >= policy.retry_limit {
                        warn!(
                            "Local {:?} stayed blocked after {} retries; dropped {} bytes",
                            stream,
                            retries,
                            data.len() - written
                        );
                        return Ok(written);
                    }
                    retries += 1;
                    policy.pause(retries).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    flush(stdio, stream);
    Ok(written)
}

fn flush<S>(stdio: &mut S, stream: OutputStream)
where
    S: LocalStdio + ?Sized,
{
    if let Err(e) = stdio.flush_output(stream) {
        if classify_io_error(&e) != IoDisposition::WouldBlock {
            debug!("Failed to flush local {:?}: {}", stream, e);
        }
    }
}

/// The process's own stdin, stdout and stderr.
#[derive(Debug, Default)]
pub struct ProcessStdio {
    #[cfg(unix)]
    saved_flags: Option<[libc::c_int; 2]>,
}

impl ProcessStdio {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(unix)]
mod unix {
    use std::fs::File;
    use std::io::{self, Read};
    use std::mem::ManuallyDrop;
    use std::os::fd::{BorrowedFd, FromRawFd, RawFd};

    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

    pub(super) fn get_flags(fd: RawFd) -> io::Result<libc::c_int> {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(flags)
    }

    pub(super) fn set_flags(fd: RawFd, flags: libc::c_int) -> io::Result<()> {
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Read stdin only if the read cannot block.
    ///
    /// Readiness is checked with a zero-timeout poll instead of setting
    /// `O_NONBLOCK`, because a terminal's stdin usually shares its open file
    /// description with stdout and the flag would leak onto the output side.
    pub(super) fn read_stdin(buf: &mut [u8]) -> io::Result<usize> {
        let stdin = unsafe { BorrowedFd::borrow_raw(libc::STDIN_FILENO) };
        let mut fds = [PollFd::new(stdin, PollFlags::POLLIN)];

        let ready = poll(&mut fds, PollTimeout::ZERO).map_err(io::Error::from)?;
        if ready == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        // The fd belongs to the process; ManuallyDrop keeps it open.
        let mut file = ManuallyDrop::new(unsafe { File::from_raw_fd(libc::STDIN_FILENO) });
        file.read(buf)
    }
}

#[cfg(unix)]
impl LocalStdio for ProcessStdio {
    fn prepare(&mut self) -> io::Result<()> {
        if self.saved_flags.is_some() {
            return Ok(());
        }

        let stdout = unix::get_flags(libc::STDOUT_FILENO)?;
        let stderr = unix::get_flags(libc::STDERR_FILENO)?;
        self.saved_flags = Some([stdout, stderr]);

        unix::set_flags(libc::STDOUT_FILENO, stdout & !libc::O_NONBLOCK)?;
        unix::set_flags(libc::STDERR_FILENO, stderr & !libc::O_NONBLOCK)?;
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        let Some([stdout, stderr]) = self.saved_flags.take() else {
            return Ok(());
        };
        let first = unix::set_flags(libc::STDOUT_FILENO, stdout);
        let second = unix::set_flags(libc::STDERR_FILENO, stderr);
        first.and(second)
    }

    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        unix::read_stdin(buf)
    }

    fn write_output(&mut self, stream: OutputStream, data: &[u8]) -> io::Result<usize> {
        match stream {
            OutputStream::Stdout => io::stdout().write(data),
            OutputStream::Stderr => io::stderr().write(data),
        }
    }

    fn flush_output(&mut self, stream: OutputStream) -> io::Result<()> {
        match stream {
            OutputStream::Stdout => io::stdout().flush(),
            OutputStream::Stderr => io::stderr().flush(),
        }
    }
}

#[cfg(windows)]
impl LocalStdio for ProcessStdio {
    fn prepare(&mut self) -> io::Result<()> {
        // Console handles are always blocking; input readiness is checked per read.
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_input(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use windows_sys::Win32::Foundation::WAIT_OBJECT_0;
        use windows_sys::Win32::Storage::FileSystem::ReadFile;
        use windows_sys::Win32::System::Console::STD_INPUT_HANDLE;
        use windows_sys::Win32::System::Threading::WaitForSingleObject;

        let handle = super::terminal::windows_std_handle(STD_INPUT_HANDLE)?;
        if unsafe { WaitForSingleObject(handle, 0) } != WAIT_OBJECT_0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        if !console_has_key_input(handle)? {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        let mut read: u32 = 0;
        let ok = unsafe {
            ReadFile(
                handle,
                buf.as_mut_ptr(),
                len,
                &mut read,
                std::ptr::null_mut(),
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(read as usize)
    }

    fn write_output(&mut self, stream: OutputStream, data: &[u8]) -> io::Result<usize> {
        match stream {
            OutputStream::Stdout => io::stdout().write(data),
            OutputStream::Stderr => io::stderr().write(data),
        }
    }

    fn flush_output(&mut self, stream: OutputStream) -> io::Result<()> {
        match stream {
            OutputStream::Stdout => io::stdout().flush(),
            OutputStream::Stderr => io::stderr().flush(),
        }
    }
}

/// Whether a pending console event will produce input for `ReadFile`.
///
/// Focus, mouse and buffer-size events also signal the handle but would leave
/// `ReadFile` blocked; they are discarded here. Handles that are not consoles
/// (pipes, files) are always reported ready.
#[cfg(windows)]
fn console_has_key_input(handle: windows_sys::Win32::Foundation::HANDLE) -> io::Result<bool> {
    use windows_sys::Win32::System::Console::{
        GetNumberOfConsoleInputEvents, PeekConsoleInputW, ReadConsoleInputW, INPUT_RECORD,
        KEY_EVENT,
    };

    let mut count: u32 = 0;
    if unsafe { GetNumberOfConsoleInputEvents(handle, &mut count) } == 0 {
        return Ok(true);
    }
    if count == 0 {
        return Ok(false);
    }

    let mut records: Vec<INPUT_RECORD> = vec![unsafe { std::mem::zeroed() }; count as usize];
    let mut peeked: u32 = 0;
    if unsafe { PeekConsoleInputW(handle, records.as_mut_ptr(), count, &mut peeked) } == 0 {
        return Err(io::Error::last_os_error());
    }

    let has_key = records[..peeked as usize].iter().any(|record| {
        u32::from(record.EventType) == KEY_EVENT as u32
            && unsafe { record.Event.KeyEvent.bKeyDown } != 0
    });
    if !has_key {
        let mut discarded: u32 = 0;
        if unsafe { ReadConsoleInputW(handle, records.as_mut_ptr(), peeked, &mut discarded) } == 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(has_key)
}

impl Drop for ProcessStdio {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("Failed to restore stdio flags: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Output sink that reports would-block a fixed number of times per call
    /// sequence, then accepts at most `accept` bytes per write.
    struct StubbornOutput {
        blocks_left: u32,
        accept: usize,
        attempts: u32,
        written: Vec<u8>,
        flushes: u32,
    }

    impl StubbornOutput {
        fn new(blocks: u32, accept: usize) -> Self {
            Self {
                blocks_left: blocks,
                accept,
                attempts: 0,
                written: Vec::new(),
                flushes: 0,
            }
        }
    }

    impl LocalStdio for StubbornOutput {
        fn prepare(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn restore(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn read_input(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }

        fn write_output(&mut self, _stream: OutputStream, data: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            if self.blocks_left > 0 {
                self.blocks_left -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = data.len().min(self.accept);
            self.written.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush_output(&mut self, _stream: OutputStream) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    fn fast_policy(retry_limit: u32) -> WritePolicy {
        WritePolicy {
            retry_limit,
            backoff: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_partial_writes_are_completed() {
        let mut out = StubbornOutput::new(0, 3);
        let written = write_output(&mut out, OutputStream::Stdout, b"hello world", &fast_policy(4))
            .await
            .unwrap();

        assert_eq!(written, 11);
        assert_eq!(out.written, b"hello world");
        assert_eq!(out.flushes, 1);
    }

    #[tokio::test]
    async fn test_transient_would_block_is_retried() {
        let mut out = StubbornOutput::new(3, usize::MAX);
        let written = write_output(&mut out, OutputStream::Stdout, b"data", &fast_policy(8))
            .await
            .unwrap();

        assert_eq!(written, 4);
        assert_eq!(out.attempts, 4);
    }

    #[tokio::test]
    async fn test_persistent_would_block_is_bounded() {
        let mut out = StubbornOutput::new(u32::MAX, usize::MAX);
        let written = write_output(&mut out, OutputStream::Stdout, b"lost", &fast_policy(5))
            .await
            .unwrap();

        assert_eq!(written, 0);
        // One initial attempt plus the permitted retries.
        assert_eq!(out.attempts, 6);
    }

    #[tokio::test]
    async fn test_large_output_is_chunked() {
        struct ChunkRecorder(Vec<usize>);

        impl LocalStdio for ChunkRecorder {
            fn prepare(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn restore(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn read_input(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn write_output(&mut self, _stream: OutputStream, data: &[u8]) -> io::Result<usize> {
                self.0.push(data.len());
                Ok(data.len())
            }
            fn flush_output(&mut self, _stream: OutputStream) -> io::Result<()> {
                Ok(())
            }
        }

        let data = vec![b'x'; CHANNEL_BUFFER_SIZE * 2 + 10];
        let mut out = ChunkRecorder(Vec::new());
        write_output(&mut out, OutputStream::Stdout, &data, &WritePolicy::default())
            .await
            .unwrap();

        assert_eq!(out.0, vec![CHANNEL_BUFFER_SIZE, CHANNEL_BUFFER_SIZE, 10]);
    }

    #[tokio::test]
    async fn test_broken_pipe_is_returned() {
        struct Broken;

        impl LocalStdio for Broken {
            fn prepare(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn restore(&mut self) -> io::Result<()> {
                Ok(())
            }
            fn read_input(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
            fn write_output(&mut self, _stream: OutputStream, _data: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush_output(&mut self, _stream: OutputStream) -> io::Result<()> {
                Ok(())
            }
        }

        let err = write_output(&mut Broken, OutputStream::Stderr, b"x", &fast_policy(3))
            .await
            .unwrap_err();
        assert_eq!(classify_io_error(&err), IoDisposition::SessionEnded);
    }
}
