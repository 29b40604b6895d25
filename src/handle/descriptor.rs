//! Native waitable descriptors
//!
//! On Unix each object can expose one end of a socket pair that holds
//! exactly one byte while the object is signaled and none otherwise, so
//! poll/select report it readable iff the object is signaled. The pair is
//! created on first request. Both [`SignalDescriptor::raw`] and
//! [`SignalDescriptor::sync`] must be called with the owning object's
//! state lock held, which keeps the byte in step with the object state.

#[cfg(unix)]
pub type RawDescriptor = std::os::fd::RawFd;

#[cfg(not(unix))]
pub type RawDescriptor = i64;

#[cfg(unix)]
pub(crate) use unix::SignalDescriptor;

#[cfg(not(unix))]
pub(crate) use fallback::SignalDescriptor;

#[cfg(unix)]
mod unix {
    use super::RawDescriptor;
    use crate::error::Result;
    use std::io::{self, Read, Write};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) struct SignalDescriptor {
        pipe: OnceLock<SignalPipe>,
    }

    impl SignalDescriptor {
        pub(crate) const fn new() -> Self {
            Self { pipe: OnceLock::new() }
        }

        /// Descriptor for poll/select, created on first use in state `signaled`
        pub(crate) fn raw(&self, signaled: bool) -> Result<RawDescriptor> {
            let pipe = match self.pipe.get() {
                Some(pipe) => pipe,
                None => {
                    let fresh = SignalPipe::open().map_err(|e| {
                        tracing::warn!(error = %e, "failed to create native descriptor");
                        e
                    })?;
                    self.pipe.get_or_init(|| fresh)
                }
            };
            pipe.set(signaled);
            Ok(pipe.reader.as_raw_fd())
        }

        /// Follow a signaled-state change. No-op until a descriptor exists.
        pub(crate) fn sync(&self, signaled: bool) {
            if let Some(pipe) = self.pipe.get() {
                pipe.set(signaled);
            }
        }
    }

    pub(super) struct SignalPipe {
        pub(super) reader: UnixStream,
        writer: UnixStream,
        readable: AtomicBool,
    }

    impl SignalPipe {
        pub(super) fn open() -> io::Result<Self> {
            let (reader, writer) = UnixStream::pair()?;
            reader.set_nonblocking(true)?;
            writer.set_nonblocking(true)?;
            Ok(SignalPipe {
                reader,
                writer,
                readable: AtomicBool::new(false),
            })
        }

        pub(super) fn set(&self, signaled: bool) {
            if self.readable.load(Ordering::Acquire) == signaled {
                return;
            }
            let outcome = if signaled {
                (&self.writer).write(&[1])
            } else {
                let mut byte = [0u8; 1];
                (&self.reader).read(&mut byte)
            };
            match outcome {
                Ok(1) => self.readable.store(signaled, Ordering::Release),
                Ok(n) => tracing::warn!(transferred = n, signaled, "short transfer on signal pipe"),
                Err(e) => tracing::warn!(error = %e, signaled, "signal pipe update failed"),
            }
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use super::RawDescriptor;
    use crate::error::{Error, Result};

    pub(crate) struct SignalDescriptor;

    impl SignalDescriptor {
        pub(crate) const fn new() -> Self {
            SignalDescriptor
        }

        pub(crate) fn raw(&self, _signaled: bool) -> Result<RawDescriptor> {
            Err(Error::Unsupported("native descriptors require a Unix target"))
        }

        pub(crate) fn sync(&self, _signaled: bool) {}
    }
}
