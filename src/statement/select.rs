use log::{debug, warn};

use crate::{
    Error, Result,
    block::{Block, Column},
    protocol::{ProfileInfo, Progress, Request, Transport},
    session::{Incoming, Session, SessionStatus},
};

use super::ProgressHook;

/// Cursor over the result blocks of a query.
///
/// Holds the session until the server signals the end of the stream. Dropping a stream
/// before that closes the session, because unread packets would otherwise be taken for
/// the answer to the next query.
pub struct SelectStream<'a, S: Transport> {
    session: &'a mut Session<S>,
    on_progress: Option<ProgressHook>,
    header: Option<Block>,
    block: Option<Block>,
    next_column: usize,
    progress: Progress,
    profile_info: Option<ProfileInfo>,
    totals: Option<Block>,
    extremes: Option<Block>,
    finished: bool,
}

impl<'a, S: Transport> SelectStream<'a, S> {
    pub(crate) fn new(session: &'a mut Session<S>, on_progress: Option<ProgressHook>) -> Self {
        Self {
            session,
            on_progress,
            header: None,
            block: None,
            next_column: 0,
            progress: Progress::default(),
            profile_info: None,
            totals: None,
            extremes: None,
            finished: false,
        }
    }

    /// Advances to the next block with rows. Returns false once the stream has ended.
    pub fn next(&mut self) -> Result<bool> {
        self.block = None;
        self.next_column = 0;
        if self.finished {
            return Ok(false);
        }
        if self.session.is_closed() {
            return Err(Error::ConnLock {
                status: SessionStatus::Closed,
            });
        }

        loop {
            match self
                .session
                .receive(&mut self.progress, &mut self.on_progress)?
            {
                Incoming::Data(block) if block.rows() == 0 => {
                    if self.header.is_none() {
                        self.header = Some(block);
                    }
                }
                Incoming::Data(block) => {
                    debug!("block of {} rows", block.rows());
                    if self.header.is_none() {
                        self.header = Some(header_of(&block)?);
                    }
                    self.block = Some(block);
                    return Ok(true);
                }
                Incoming::Totals(block) => self.totals = Some(block),
                Incoming::Extremes(block) => self.extremes = Some(block),
                Incoming::ProfileInfo(info) => self.profile_info = Some(info),
                Incoming::EndOfStream => {
                    self.finished = true;
                    self.session.finish();
                    return Ok(false);
                }
                Incoming::Pong => {
                    return Err(self.session.fail(Error::unexpected("Data", "Pong")));
                }
            }
        }
    }

    /// The next column of the current block, moving left to right.
    pub fn next_column(&mut self) -> Option<&Column> {
        let column = self.block.as_ref()?.column(self.next_column)?;
        self.next_column += 1;
        Some(column)
    }

    /// The block returned by the last successful [`next`](Self::next).
    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    /// Column names and types of the result, known once the first block arrived.
    pub fn header(&self) -> Option<&Block> {
        self.header.as_ref()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn profile_info(&self) -> Option<&ProfileInfo> {
        self.profile_info.as_ref()
    }

    pub fn totals(&self) -> Option<&Block> {
        self.totals.as_ref()
    }

    pub fn extremes(&self) -> Option<&Block> {
        self.extremes.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Reads and discards the rest of the result, leaving the session usable.
    pub fn close(mut self) -> Result<()> {
        while self.next()? {}
        Ok(())
    }

    /// Asks the server to stop the query, then drains what it already sent.
    pub fn cancel(self) -> Result<()> {
        if !self.finished {
            self.session.send(&Request::Cancel)?;
        }
        self.close()
    }
}

impl<S: Transport> Drop for SelectStream<'_, S> {
    fn drop(&mut self) {
        if !self.finished && !self.session.is_closed() {
            warn!("result stream dropped before its end, closing session");
            self.session.close();
        }
    }
}

/// Zero-row copy of a block's columns.
fn header_of(block: &Block) -> Result<Block> {
    let columns = block
        .columns()
        .iter()
        .map(|column| Column::with_capacity(column.descriptor().clone(), 0))
        .collect();
    Block::new(columns)
}
