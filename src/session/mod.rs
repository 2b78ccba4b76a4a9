//! Sessions: one physical connection and its lifecycle.
//!
//! A [`Session`] owns the transport, the negotiated [`ServerInfo`] and a [`ConnLock`]
//! that allows one operation in flight. Statements borrow the session mutably for their
//! whole lifetime, so the borrow checker already prevents overlapping statements; the
//! lock tracks the runtime status (a statement may be abandoned mid-stream, a session
//! may be closed by an error) and rejects work on a session that cannot take it.
//!
//! Any error that can leave the byte stream misaligned (I/O, protocol violations, server
//! exceptions, cancellation) closes the session. Errors raised before anything was sent
//! leave it usable.
mod cancel;
mod lock;

use std::{
    io,
    net::{TcpStream, ToSocketAddrs},
    time::Instant,
};

use log::{debug, error, info, log, trace, warn};

pub use cancel::CancelToken;
pub(crate) use cancel::Watcher;
pub use lock::SessionStatus;
pub(crate) use lock::ConnLock;

use crate::{
    Error, Result,
    block::Block,
    config::{Config, Endpoint},
    protocol::{
        ClientInfo, ProfileInfo, Progress, ProtocolTransport, Request, Response, ServerInfo,
        Transport, revision,
    },
    settings::Settings,
    statement::{Insert, ProgressHook, Query, SelectStream},
    types::Value,
};

/// Packets a statement acts on; everything else is consumed by [`Session::receive`].
#[derive(Debug)]
pub(crate) enum Incoming {
    Data(Block),
    Totals(Block),
    Extremes(Block),
    ProfileInfo(ProfileInfo),
    Pong,
    EndOfStream,
}

impl Incoming {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Incoming::Data(_) => "Data",
            Incoming::Totals(_) => "Totals",
            Incoming::Extremes(_) => "Extremes",
            Incoming::ProfileInfo(_) => "ProfileInfo",
            Incoming::Pong => "Pong",
            Incoming::EndOfStream => "EndOfStream",
        }
    }
}

pub struct Session<S: Transport = TcpStream> {
    transport: ProtocolTransport<S>,
    server: ServerInfo,
    client_info: ClientInfo,
    settings: Settings,
    lock: ConnLock,
    watcher: Option<Watcher>,
}

impl Session<TcpStream> {
    /// Connects to the first reachable endpoint of `config`.
    pub fn connect(config: &Config) -> Result<Self> {
        Self::dial(config, |endpoint| {
            let mut last_error = None;
            for address in (endpoint.host.as_str(), endpoint.port).to_socket_addrs()? {
                match TcpStream::connect_timeout(&address, config.connect_timeout) {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        return Ok(stream);
                    }
                    Err(e) => last_error = Some(e),
                }
            }
            Err(last_error.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "host resolved to no address")
            }))
        })
    }
}

impl<S: Transport> Session<S> {
    /// Tries the primary endpoint, then each fallback, with a caller-provided dialer.
    ///
    /// Stops at the first endpoint that completes the handshake. A rejected login stops
    /// the search immediately since every host shares the credentials.
    pub fn dial<F>(config: &Config, mut dial: F) -> Result<Self>
    where
        F: FnMut(&Endpoint) -> io::Result<S>,
    {
        let mut last_error = None;
        for endpoint in config.endpoints() {
            let stream = match dial(endpoint) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("could not reach {endpoint}: {e}");
                    last_error = Some(Error::Connect {
                        message: format!("dial {endpoint}"),
                        source: Some(Box::new(Error::Io(e))),
                    });
                    continue;
                }
            };
            match Self::open(stream, config) {
                Ok(session) => return Ok(session),
                Err(e) if e.is_authentication() => return Err(e),
                Err(e) => {
                    warn!("handshake with {endpoint} failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Connect {
            message: "no endpoint configured".to_string(),
            source: None,
        }))
    }

    /// Runs the handshake over an already connected stream.
    pub fn open(stream: S, config: &Config) -> Result<Self> {
        let mut client_info = ClientInfo::new(&config.client_name);
        client_info.quota_key = config.quota_key.clone();

        let mut session = Session {
            transport: ProtocolTransport::new(stream),
            server: ServerInfo::default(),
            client_info,
            settings: config.settings.clone(),
            lock: ConnLock::new(),
            watcher: None,
        };
        session.lock.connecting();

        match session.handshake(config) {
            Ok(()) => {
                session.lock.ready();
                info!(
                    "connected to {} {} (revision {})",
                    session.server.name,
                    session.server.version(),
                    session.revision()
                );
                Ok(session)
            }
            Err(e) => {
                session.close();
                Err(Error::Connect {
                    message: "handshake failed".to_string(),
                    source: Some(Box::new(e)),
                })
            }
        }
    }

    fn handshake(&mut self, config: &Config) -> Result<()> {
        self.transport
            .set_deadline(Some(Instant::now() + config.connect_timeout))?;
        self.transport.write_request(&Request::Hello {
            client_name: &config.client_name,
            database: &config.database,
            user: &config.user,
            password: &config.password,
        })?;

        let server = loop {
            match self.transport.read_response()? {
                Response::Hello(server) => break server,
                Response::Progress(_) | Response::TableColumns => continue,
                Response::Exception(e) => return Err(Error::Server(e)),
                other => return Err(Error::unexpected("Hello", other.kind())),
            }
        };

        let revision = server.negotiated_revision();
        self.transport.set_revision(revision);
        self.server = server;
        if revision >= revision::ADDENDUM {
            self.transport.write_request(&Request::Addendum {
                quota_key: &config.quota_key,
            })?;
        }

        self.transport.set_compression(config.compression);
        self.transport.set_deadline(None)?;
        Ok(())
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// Negotiated protocol revision.
    pub fn revision(&self) -> u64 {
        self.transport.revision()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock.status()
    }

    pub fn is_closed(&self) -> bool {
        self.status() == SessionStatus::Closed
    }

    /// Closes the connection. Calling it again has no effect.
    pub fn close(&mut self) {
        if self.lock.close() {
            self.watcher = None;
            if let Err(e) = self.transport.get_mut().shutdown() {
                debug!("shutdown: {e}");
            }
            info!("session closed");
        }
    }

    /// Checks that the server answers.
    pub fn ping(&mut self) -> Result<()> {
        self.lock.acquire()?;
        self.send(&Request::Ping)?;
        let mut progress = Progress::default();
        match self.receive(&mut progress, &mut None)? {
            Incoming::Pong => {
                self.finish();
                Ok(())
            }
            other => Err(self.fail(Error::unexpected("Pong", other.kind()))),
        }
    }

    /// Runs a statement and discards any result.
    pub fn exec(&mut self, query: impl Into<Query>) -> Result<()> {
        let mut query = query.into();
        self.start(&query)?;
        let mut progress = Progress::default();
        loop {
            match self.receive(&mut progress, &mut query.on_progress)? {
                Incoming::EndOfStream => {
                    self.finish();
                    return Ok(());
                }
                Incoming::Pong => return Err(self.fail(Error::unexpected("EndOfStream", "Pong"))),
                _ => {}
            }
        }
    }

    /// Runs a query and streams its result blocks.
    pub fn select(&mut self, query: impl Into<Query>) -> Result<SelectStream<'_, S>> {
        let query = query.into();
        self.start(&query)?;
        Ok(SelectStream::new(self, query.on_progress))
    }

    /// Runs a query and collects every row.
    pub fn query_rows(&mut self, query: impl Into<Query>) -> Result<Vec<Vec<Value>>> {
        let mut stream = self.select(query)?;
        let mut rows = Vec::new();
        while stream.next()? {
            if let Some(block) = stream.block() {
                rows.extend((0..block.rows()).filter_map(|row| block.row(row)));
            }
        }
        Ok(rows)
    }

    /// Starts an `INSERT ... VALUES` statement and waits for the table header.
    pub fn insert(&mut self, query: impl Into<Query>) -> Result<Insert<'_, S>> {
        let mut query = query.into();
        self.start(&query)?;
        let mut progress = Progress::default();
        let header = loop {
            match self.receive(&mut progress, &mut query.on_progress)? {
                Incoming::Data(block) => break block,
                other => return Err(self.fail(Error::unexpected("Data", other.kind()))),
            }
        };
        Ok(Insert::new(self, header, query.on_progress))
    }

    /// Marks the session busy, arms cancellation and sends the query packets.
    fn start(&mut self, query: &Query) -> Result<()> {
        self.lock.acquire()?;
        debug!("query {:?}: {}", query.query_id, query.sql);

        if let Some(token) = &query.cancel {
            let handle = match self.transport.get_ref().deadline_handle() {
                Ok(handle) => handle,
                Err(e) => return Err(self.fail(e.into())),
            };
            self.watcher = Some(Watcher::arm(token, handle));
            if token.is_cancelled() {
                return Err(self.fail(Error::Canceled { source: None }));
            }
        }
        if let Some(timeout) = query.timeout {
            if let Err(e) = self
                .transport
                .set_deadline(Some(Instant::now() + timeout))
            {
                return Err(self.fail(e.into()));
            }
        }

        let settings = self.settings.merged(&query.settings);
        let client_info = self.client_info.clone();
        self.send(&Request::Query {
            query_id: &query.query_id,
            client_info: &client_info,
            settings: &settings,
            parameters: &query.parameters,
            sql: &query.sql,
        })?;
        self.send_block(&Block::empty())
    }

    /// Ends the current operation and makes the session idle again.
    pub(crate) fn finish(&mut self) {
        self.watcher = None;
        if !self.is_closed() {
            if let Err(e) = self.transport.set_deadline(None) {
                debug!("clear deadline: {e}");
            }
        }
        self.lock.release();
    }

    /// Turns a failure into the error returned to the caller, closing the session when
    /// the stream can no longer be trusted.
    pub(crate) fn fail(&mut self, error: Error) -> Error {
        let fired = self.watcher.as_ref().is_some_and(Watcher::fired);
        let error = match error {
            Error::Canceled { .. } => error,
            error if fired => Error::Canceled {
                source: Some(Box::new(error)),
            },
            error => error,
        };
        if error.is_fatal() {
            error!("closing session: {error}");
            self.close();
        }
        error
    }

    pub(crate) fn send(&mut self, request: &Request<'_>) -> Result<()> {
        self.transport
            .write_request(request)
            .map_err(|e| self.fail(e))
    }

    pub(crate) fn send_block(&mut self, block: &Block) -> Result<()> {
        self.send(&Request::Data { table: "", block })
    }

    /// Reads packets until one a statement has to act on.
    pub(crate) fn receive(
        &mut self,
        progress: &mut Progress,
        hook: &mut Option<ProgressHook>,
    ) -> Result<Incoming> {
        loop {
            let response = match self.transport.read_response() {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e)),
            };
            let incoming = match response {
                Response::Progress(increment) => {
                    progress.merge(&increment);
                    if let Some(hook) = hook {
                        hook(progress);
                    }
                    continue;
                }
                Response::TableColumns | Response::ProfileEvents(_) => continue,
                Response::Log(block) => {
                    forward_server_log(&block);
                    continue;
                }
                Response::Exception(e) => return Err(self.fail(Error::Server(e))),
                Response::Hello(_) => {
                    return Err(self.fail(Error::unexpected("query response", "Hello")));
                }
                Response::Data(block) => Incoming::Data(block),
                Response::Totals(block) => Incoming::Totals(block),
                Response::Extremes(block) => Incoming::Extremes(block),
                Response::ProfileInfo(info) => Incoming::ProfileInfo(info),
                Response::Pong => Incoming::Pong,
                Response::EndOfStream => Incoming::EndOfStream,
            };
            trace!("incoming {}", incoming.kind());
            return Ok(incoming);
        }
    }
}

impl<S: Transport> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("server", &self.server.name)
            .field("revision", &self.revision())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Re-emits the rows of a server Log block through the `log` crate.
fn forward_server_log(block: &Block) {
    let (Some(priority), Some(source), Some(text)) = (
        block.column_by_name("priority"),
        block.column_by_name("source"),
        block.column_by_name("text"),
    ) else {
        return;
    };
    for row in 0..block.rows() {
        let level = match priority.get(row) {
            Some(Value::Int8(p)) if p <= 3 => log::Level::Error,
            Some(Value::Int8(4)) => log::Level::Warn,
            Some(Value::Int8(5 | 6)) => log::Level::Info,
            Some(Value::Int8(7)) => log::Level::Debug,
            _ => log::Level::Trace,
        };
        let source = source.get(row).unwrap_or(Value::Null);
        let text = text.get(row).unwrap_or(Value::Null);
        log!(target: "chwire::server", level, "[{source}] {text}");
    }
}
