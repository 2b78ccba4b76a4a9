use std::{
    fmt,
    io::{self, BufReader, Read, Write},
    net::{Shutdown, TcpStream},
    sync::Arc,
    time::{Duration, Instant},
};

use log::trace;

use crate::{
    Result,
    binary::{Reader, Writer},
    error::WriteContext,
};

use super::{Compression, Request, Response, revision::CLIENT_REVISION};

/// A byte stream the protocol can run over.
///
/// Implemented for [`TcpStream`]; a TLS stream or an in-memory pipe can be used as long
/// as it can bound blocking calls with a deadline.
pub trait Transport: Read + Write {
    /// Deadline for subsequent reads and writes, `None` clears it.
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()>;

    /// A handle that makes blocked I/O on this transport fail, callable from any thread.
    fn deadline_handle(&self) -> io::Result<DeadlineHandle>;

    fn shutdown(&mut self) -> io::Result<()>;
}

/// Expires a transport's deadline from another thread.
#[derive(Clone)]
pub struct DeadlineHandle(Arc<dyn Fn() + Send + Sync>);

impl DeadlineHandle {
    pub fn new(expire: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(expire))
    }

    pub fn expire(&self) {
        (self.0)()
    }
}

impl fmt::Debug for DeadlineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeadlineHandle")
    }
}

impl Transport for TcpStream {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        // A zero timeout is rejected by the socket API, so an expired deadline becomes
        // the shortest possible one.
        let timeout = deadline.map(|d| {
            d.saturating_duration_since(Instant::now())
                .max(Duration::from_nanos(1))
        });
        self.set_read_timeout(timeout)?;
        self.set_write_timeout(timeout)
    }

    /// std cannot move a deadline of a socket blocked in another thread, so expiring
    /// shuts a cloned handle down instead.
    fn deadline_handle(&self) -> io::Result<DeadlineHandle> {
        let stream = self.try_clone()?;
        Ok(DeadlineHandle::new(move || {
            let _ = stream.shutdown(Shutdown::Both);
        }))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Holds a transport to an absolute deadline: the remaining time is recomputed before
/// every read and write, so a peer that keeps sending cannot stretch it.
struct Bounded<S> {
    inner: S,
    deadline: Option<Instant>,
}

impl<S: Transport> Bounded<S> {
    fn arm(&mut self) -> io::Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "deadline expired"));
            }
            self.inner.set_deadline(Some(deadline))?;
        }
        Ok(())
    }
}

impl<S: Transport> Read for Bounded<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        self.inner.read(buf)
    }
}

impl<S: Transport> Write for Bounded<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm()?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Packet-level reader/writer over a transport.
pub struct ProtocolTransport<S: Transport> {
    stream: BufReader<Bounded<S>>,
    revision: u64,
    compression: Compression,
}

impl<S: Transport> ProtocolTransport<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(Bounded {
                inner: stream,
                deadline: None,
            }),
            revision: CLIENT_REVISION,
            compression: Compression::None,
        }
    }

    /// Deadline for everything sent and received until it is cleared.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        let bounded = self.stream.get_mut();
        bounded.deadline = deadline;
        bounded.inner.set_deadline(deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.stream.get_ref().deadline
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }

    pub fn compression(&self) -> Compression {
        self.compression
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.compression = compression;
    }

    pub fn get_ref(&self) -> &S {
        &self.stream.get_ref().inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream.get_mut().inner
    }

    /// Encodes a whole packet in memory, then sends it with a single write and flush.
    pub fn write_request(&mut self, request: &Request<'_>) -> Result<()> {
        trace!("client packet {}", request.kind());
        let mut packet = Vec::new();
        request.write(&mut Writer::new(&mut packet), self.revision, self.compression)?;

        let location = format!("transport: send {} packet", request.kind());
        let stream = self.stream.get_mut();
        stream.write_all(&packet).write_context(&location)?;
        stream.flush().write_context(&location)
    }

    pub fn read_response(&mut self) -> Result<Response> {
        let response = Response::read(
            &mut Reader::new(&mut self.stream),
            self.revision,
            self.compression,
        )?;
        trace!("received {}", response.kind());
        Ok(response)
    }
}
