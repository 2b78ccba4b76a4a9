use log::{debug, warn};

use crate::{
    Error, ProtocolError, Result,
    block::{Block, Column, ColumnDescriptor},
    protocol::{Progress, Transport},
    session::{Incoming, Session},
    types::Value,
};

use super::ProgressHook;

/// An `INSERT` in progress.
///
/// The server answers the query with a header block naming the columns it expects; every
/// block written is checked against it before anything is sent, so a rejected block
/// leaves the insert usable. [`finish`](Self::finish) or [`commit`](Self::commit) ends
/// the data stream.
pub struct Insert<'a, S: Transport> {
    session: &'a mut Session<S>,
    header: Block,
    on_progress: Option<ProgressHook>,
    progress: Progress,
    rows: usize,
    finished: bool,
}

impl<'a, S: Transport> Insert<'a, S> {
    pub(crate) fn new(
        session: &'a mut Session<S>,
        header: Block,
        on_progress: Option<ProgressHook>,
    ) -> Self {
        Self {
            session,
            header,
            on_progress,
            progress: Progress::default(),
            rows: 0,
            finished: false,
        }
    }

    pub fn header(&self) -> &Block {
        &self.header
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.header.descriptors()
    }

    /// Rows sent so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// Empty columns shaped after the header, for building a block row by row.
    pub fn row_builder(&self, capacity: usize) -> RowBuilder {
        let columns = self
            .columns()
            .map(|descriptor| Column::with_capacity(descriptor.clone(), capacity))
            .collect();
        RowBuilder { columns, rows: 0 }
    }

    /// Validates `columns` against the header and sends them as one block.
    ///
    /// Columns are matched by position when their names are empty and by name otherwise.
    pub fn write_block(&mut self, columns: Vec<Column>) -> Result<()> {
        self.ensure_open()?;
        let block = self.arrange(columns)?;
        if block.rows() == 0 {
            return Ok(());
        }
        debug!("insert block of {} rows", block.rows());
        self.session.send_block(&block)?;
        self.rows += block.rows();
        Ok(())
    }

    /// Ends the data stream and waits for the server to acknowledge it.
    pub fn finish(mut self) -> Result<()> {
        self.end()
    }

    /// Writes one block and finishes.
    ///
    /// A block rejected by validation is not sent and the insert stays open, so the
    /// caller may retry or [`finish`](Self::finish).
    pub fn commit(&mut self, columns: Vec<Column>) -> Result<()> {
        self.write_block(columns)?;
        self.end()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(Error::Value("insert already finished".to_string()));
        }
        Ok(())
    }

    fn end(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.session.send_block(&Block::empty())?;
        let incoming = self
            .session
            .receive(&mut self.progress, &mut self.on_progress)?;
        match incoming {
            Incoming::EndOfStream => {
                self.finished = true;
                self.session.finish();
                debug!("inserted {} rows", self.rows);
                Ok(())
            }
            other => Err(self
                .session
                .fail(Error::unexpected("EndOfStream", other.kind()))),
        }
    }

    fn arrange(&self, columns: Vec<Column>) -> Result<Block> {
        let expected = self.header.columns();
        if columns.len() != expected.len() {
            return Err(ProtocolError::ColumnCountMismatch {
                expected: expected.len(),
                actual: columns.len(),
            }
            .into());
        }

        let mut slots: Vec<Option<Column>> = vec![None; expected.len()];
        for (position, column) in columns.into_iter().enumerate() {
            let index = if column.name().is_empty() {
                position
            } else {
                expected
                    .iter()
                    .position(|c| c.name() == column.name())
                    .ok_or_else(|| ProtocolError::UnknownColumn(column.name().to_string()))?
            };
            let target = expected[index].descriptor();
            if column.descriptor().column_type() != target.column_type() {
                return Err(ProtocolError::TypeMismatch {
                    column: target.name().to_string(),
                    expected: target.type_name().to_string(),
                    actual: column.type_name().to_string(),
                }
                .into());
            }
            if slots[index].is_some() {
                return Err(Error::Value(format!(
                    "column '{}' given more than once",
                    target.name()
                )));
            }
            slots[index] = Some(column.with_descriptor(target.clone()));
        }

        Block::new(slots.into_iter().flatten().collect())
    }
}

impl<S: Transport> Drop for Insert<'_, S> {
    fn drop(&mut self) {
        if !self.finished && !self.session.is_closed() {
            warn!("insert dropped before finish, closing session");
            self.session.close();
        }
    }
}

/// Column buffers filled one row at a time.
///
/// A row is appended to all columns or to none.
#[derive(Debug, Clone)]
pub struct RowBuilder {
    columns: Vec<Column>,
    rows: usize,
}

impl RowBuilder {
    pub fn append(&mut self, row: Vec<Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(ProtocolError::ColumnCountMismatch {
                expected: self.columns.len(),
                actual: row.len(),
            }
            .into());
        }
        for (index, value) in row.into_iter().enumerate() {
            if let Err(e) = self.columns[index].push(value) {
                for column in &mut self.columns[..index] {
                    column.truncate(self.rows);
                }
                return Err(e);
            }
        }
        self.rows += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }
}
