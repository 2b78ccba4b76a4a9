//! In-memory transports and scripted server packets for tests.
use std::{
    io::{self, Cursor, Read, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use crate::{binary::Writer, block::Block};

use super::{
    Compression, DeadlineHandle, Transport, compression,
    revision::{self, CLIENT_REVISION},
    server_packet,
};

/// Replays canned server bytes and records everything the client writes.
pub(crate) struct MockTransport {
    input: Cursor<Vec<u8>>,
    output: Arc<Mutex<Vec<u8>>>,
    shut_down: Arc<AtomicBool>,
    pub(crate) deadline: Option<Instant>,
}

impl MockTransport {
    pub(crate) fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Arc::new(Mutex::new(Vec::new())),
            shut_down: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    pub(crate) fn output(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.output)
    }

    pub(crate) fn shut_down_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shut_down)
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Ok(0);
        }
        self.input.read(buf)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.output
            .lock()
            .map_err(|_| io::Error::other("poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> io::Result<()> {
        self.deadline = deadline;
        Ok(())
    }

    fn deadline_handle(&self) -> io::Result<DeadlineHandle> {
        let flag = Arc::clone(&self.shut_down);
        Ok(DeadlineHandle::new(move || flag.store(true, Ordering::SeqCst)))
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Server Hello as a server at `revision` answers a client at [`CLIENT_REVISION`].
pub(crate) fn server_hello(name: &str, revision: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut w = Writer::new(&mut out);
    let negotiated = revision.min(CLIENT_REVISION);
    w.uvarint(server_packet::HELLO).unwrap();
    w.string(name).unwrap();
    w.uvarint(24).unwrap();
    w.uvarint(8).unwrap();
    w.uvarint(revision).unwrap();
    if negotiated >= revision::SERVER_TIMEZONE {
        w.string("UTC").unwrap();
    }
    if negotiated >= revision::SERVER_DISPLAY_NAME {
        w.string("server-1").unwrap();
    }
    if negotiated >= revision::VERSION_PATCH {
        w.uvarint(3).unwrap();
    }
    if negotiated >= revision::PASSWORD_COMPLEXITY_RULES {
        w.uvarint(1).unwrap();
        w.string(".{8,}").unwrap();
        w.string("at least 8 characters").unwrap();
    }
    if negotiated >= revision::INTERSERVER_SECRET_V2 {
        w.u64(0x1234).unwrap();
    }
    out
}

/// Builds the byte stream a server would send.
pub(crate) struct ServerScript {
    bytes: Vec<u8>,
    revision: u64,
    compression: Compression,
}

impl ServerScript {
    pub(crate) fn new(revision: u64) -> Self {
        Self {
            bytes: Vec::new(),
            revision,
            compression: Compression::None,
        }
    }

    pub(crate) fn compressed(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    fn writer(&mut self) -> Writer<&mut Vec<u8>> {
        Writer::new(&mut self.bytes)
    }

    pub(crate) fn hello(&mut self) -> &mut Self {
        let hello = server_hello("ClickHouse", self.revision);
        self.bytes.extend(hello);
        self
    }

    fn block(&mut self, tag: u64, block: &Block, compression: Compression) -> &mut Self {
        let revision = self.revision;
        let mut w = self.writer();
        w.uvarint(tag).unwrap();
        w.string("").unwrap();
        if compression.is_enabled() {
            let mut body = Vec::new();
            block.write(&mut Writer::new(&mut body), revision).unwrap();
            compression::write_frames(&mut self.bytes, &body, compression).unwrap();
        } else {
            block.write(&mut w, revision).unwrap();
        }
        self
    }

    pub(crate) fn data(&mut self, block: &Block) -> &mut Self {
        self.block(server_packet::DATA, block, self.compression)
    }

    pub(crate) fn totals(&mut self, block: &Block) -> &mut Self {
        self.block(server_packet::TOTALS, block, self.compression)
    }

    pub(crate) fn extremes(&mut self, block: &Block) -> &mut Self {
        self.block(server_packet::EXTREMES, block, self.compression)
    }

    pub(crate) fn log(&mut self, block: &Block) -> &mut Self {
        self.block(server_packet::LOG, block, Compression::None)
    }

    pub(crate) fn profile_events(&mut self, block: &Block) -> &mut Self {
        self.block(server_packet::PROFILE_EVENTS, block, Compression::None)
    }

    pub(crate) fn progress(&mut self, rows: u64, bytes: u64, total_rows: u64) -> &mut Self {
        let revision = self.revision;
        let mut w = self.writer();
        w.uvarint(server_packet::PROGRESS).unwrap();
        w.uvarint(rows).unwrap();
        w.uvarint(bytes).unwrap();
        w.uvarint(total_rows).unwrap();
        if revision >= revision::TOTAL_BYTES_IN_PROGRESS {
            w.uvarint(0).unwrap();
        }
        if revision >= revision::CLIENT_WRITE_INFO {
            w.uvarint(0).unwrap();
            w.uvarint(0).unwrap();
        }
        if revision >= revision::SERVER_QUERY_TIME_IN_PROGRESS {
            w.uvarint(1_000).unwrap();
        }
        self
    }

    pub(crate) fn profile_info(&mut self, rows: u64) -> &mut Self {
        let mut w = self.writer();
        w.uvarint(server_packet::PROFILE_INFO).unwrap();
        w.uvarint(rows).unwrap();
        w.uvarint(1).unwrap();
        w.uvarint(rows * 8).unwrap();
        w.bool(false).unwrap();
        w.uvarint(0).unwrap();
        w.bool(false).unwrap();
        self
    }

    pub(crate) fn exception(&mut self, code: i32, name: &str, message: &str) -> &mut Self {
        let mut w = self.writer();
        w.uvarint(server_packet::EXCEPTION).unwrap();
        w.i32(code).unwrap();
        w.string(name).unwrap();
        w.string(&format!("{name}: {message}")).unwrap();
        w.string("").unwrap();
        w.bool(false).unwrap();
        self
    }

    pub(crate) fn table_columns(&mut self) -> &mut Self {
        let mut w = self.writer();
        w.uvarint(server_packet::TABLE_COLUMNS).unwrap();
        w.string("").unwrap();
        w.string("columns format version: 1\n1 columns:\n`x` Int8\n")
            .unwrap();
        self
    }

    pub(crate) fn pong(&mut self) -> &mut Self {
        self.writer().uvarint(server_packet::PONG).unwrap();
        self
    }

    pub(crate) fn end_of_stream(&mut self) -> &mut Self {
        self.writer().uvarint(server_packet::END_OF_STREAM).unwrap();
        self
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}
