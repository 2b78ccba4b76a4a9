use std::io::Read;

use log::trace;

use crate::{
    Result,
    binary::Reader,
    block::Block,
    error::{Error, ProtocolError, ReadContext},
};

use super::{
    ChError,
    compression::{CompressedReader, Compression, unwrap_frame_error},
    revision::{self, CLIENT_REVISION},
    server_packet,
};

/// Complexity rule the server applies to new passwords.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRule {
    pub pattern: String,
    pub message: String,
}

/// What the server told us about itself in its Hello packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version_major: u64,
    pub version_minor: u64,
    pub version_patch: u64,
    pub revision: u64,
    pub timezone: Option<String>,
    pub display_name: Option<String>,
    pub password_rules: Vec<PasswordRule>,
}

impl ServerInfo {
    /// Revision both sides understand; it gates every optional field after the handshake.
    pub fn negotiated_revision(&self) -> u64 {
        self.revision.min(CLIENT_REVISION)
    }

    fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self> {
        let name = reader
            .string()
            .read_context("ServerInfo: could not read server name")?;
        let version_major = reader
            .uvarint()
            .read_context("ServerInfo: could not read server major version")?;
        let version_minor = reader
            .uvarint()
            .read_context("ServerInfo: could not read server minor version")?;
        let revision = reader
            .uvarint()
            .read_context("ServerInfo: could not read server revision")?;

        let mut info = ServerInfo {
            name,
            version_major,
            version_minor,
            version_patch: revision,
            revision,
            ..Default::default()
        };
        let negotiated = info.negotiated_revision();

        if negotiated >= revision::SERVER_TIMEZONE {
            info.timezone = Some(
                reader
                    .string()
                    .read_context("ServerInfo: could not read server timezone")?,
            );
        }
        if negotiated >= revision::SERVER_DISPLAY_NAME {
            info.display_name = Some(
                reader
                    .string()
                    .read_context("ServerInfo: could not read server display name")?,
            );
        }
        if negotiated >= revision::VERSION_PATCH {
            info.version_patch = reader
                .uvarint()
                .read_context("ServerInfo: could not read server version patch")?;
        }
        if negotiated >= revision::PASSWORD_COMPLEXITY_RULES {
            let count = reader
                .uvarint()
                .read_context("ServerInfo: could not read password rule count")?;
            for _ in 0..count {
                let pattern = reader
                    .string()
                    .read_context("ServerInfo: could not read password rule pattern")?;
                let message = reader
                    .string()
                    .read_context("ServerInfo: could not read password rule message")?;
                info.password_rules.push(PasswordRule { pattern, message });
            }
        }
        if negotiated >= revision::INTERSERVER_SECRET_V2 {
            reader
                .u64()
                .read_context("ServerInfo: could not read interserver secret nonce")?;
        }
        Ok(info)
    }

    pub fn version(&self) -> String {
        format!(
            "{}.{}.{}",
            self.version_major, self.version_minor, self.version_patch
        )
    }
}

/// Counters reported by the server while a query runs. Each packet carries increments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub rows: u64,
    pub bytes: u64,
    pub total_rows: u64,
    pub total_bytes: u64,
    pub written_rows: u64,
    pub written_bytes: u64,
    pub elapsed_ns: u64,
}

impl Progress {
    fn read<R: Read>(reader: &mut Reader<R>, revision: u64) -> Result<Self> {
        let mut progress = Progress {
            rows: reader.uvarint().read_context("progress: read rows")?,
            bytes: reader.uvarint().read_context("progress: read bytes")?,
            total_rows: reader
                .uvarint()
                .read_context("progress: read total rows")?,
            ..Default::default()
        };
        if revision >= revision::TOTAL_BYTES_IN_PROGRESS {
            progress.total_bytes = reader
                .uvarint()
                .read_context("progress: read total bytes")?;
        }
        if revision >= revision::CLIENT_WRITE_INFO {
            progress.written_rows = reader
                .uvarint()
                .read_context("progress: read written rows")?;
            progress.written_bytes = reader
                .uvarint()
                .read_context("progress: read written bytes")?;
        }
        if revision >= revision::SERVER_QUERY_TIME_IN_PROGRESS {
            progress.elapsed_ns = reader
                .uvarint()
                .read_context("progress: read elapsed time")?;
        }
        Ok(progress)
    }

    /// Adds an increment to this accumulator.
    pub fn merge(&mut self, other: &Progress) {
        self.rows += other.rows;
        self.bytes += other.bytes;
        self.total_rows += other.total_rows;
        self.total_bytes += other.total_bytes;
        self.written_rows += other.written_rows;
        self.written_bytes += other.written_bytes;
        self.elapsed_ns = self.elapsed_ns.max(other.elapsed_ns);
    }
}

/// Execution summary sent once before the end of a result stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileInfo {
    pub rows: u64,
    pub blocks: u64,
    pub bytes: u64,
    pub applied_limit: bool,
    pub rows_before_limit: u64,
    pub calculated_rows_before_limit: bool,
}

impl ProfileInfo {
    fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self> {
        Ok(ProfileInfo {
            rows: reader.uvarint().read_context("profile info: read rows")?,
            blocks: reader
                .uvarint()
                .read_context("profile info: read blocks")?,
            bytes: reader.uvarint().read_context("profile info: read bytes")?,
            applied_limit: reader
                .bool()
                .read_context("profile info: read applied limit")?,
            rows_before_limit: reader
                .uvarint()
                .read_context("profile info: read rows before limit")?,
            calculated_rows_before_limit: reader
                .bool()
                .read_context("profile info: read calculated rows before limit")?,
        })
    }
}

/// Packets sent by the server.
#[derive(Debug)]
pub enum Response {
    Hello(ServerInfo),
    Data(Block),
    Exception(ChError),
    Progress(Progress),
    Pong,
    EndOfStream,
    ProfileInfo(ProfileInfo),
    Totals(Block),
    Extremes(Block),
    Log(Block),
    /// Column descriptions for `INSERT`; the content is not used.
    TableColumns,
    ProfileEvents(Block),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Hello(_) => "Hello",
            Response::Data(_) => "Data",
            Response::Exception(_) => "Exception",
            Response::Progress(_) => "Progress",
            Response::Pong => "Pong",
            Response::EndOfStream => "EndOfStream",
            Response::ProfileInfo(_) => "ProfileInfo",
            Response::Totals(_) => "Totals",
            Response::Extremes(_) => "Extremes",
            Response::Log(_) => "Log",
            Response::TableColumns => "TableColumns",
            Response::ProfileEvents(_) => "ProfileEvents",
        }
    }

    pub(crate) fn read<R: Read>(
        reader: &mut Reader<R>,
        revision: u64,
        compression: Compression,
    ) -> Result<Self> {
        let tag = reader.uvarint().read_context("packet: read packet kind")?;
        trace!("server packet {tag}");

        let response = match tag {
            server_packet::HELLO => Response::Hello(ServerInfo::read(reader)?),
            server_packet::DATA => Response::Data(read_block(reader, revision, compression, "data")?),
            server_packet::EXCEPTION => Response::Exception(ChError::read(reader)?),
            server_packet::PROGRESS => Response::Progress(Progress::read(reader, revision)?),
            server_packet::PONG => Response::Pong,
            server_packet::END_OF_STREAM => Response::EndOfStream,
            server_packet::PROFILE_INFO => Response::ProfileInfo(ProfileInfo::read(reader)?),
            server_packet::TOTALS => {
                Response::Totals(read_block(reader, revision, compression, "totals")?)
            }
            server_packet::EXTREMES => {
                Response::Extremes(read_block(reader, revision, compression, "extremes")?)
            }
            server_packet::LOG => {
                Response::Log(read_block(reader, revision, Compression::None, "log")?)
            }
            server_packet::TABLE_COLUMNS => {
                reader
                    .string()
                    .read_context("table columns: read table name")?;
                reader
                    .string()
                    .read_context("table columns: read description")?;
                Response::TableColumns
            }
            server_packet::PROFILE_EVENTS => Response::ProfileEvents(read_block(
                reader,
                revision,
                Compression::None,
                "profile events",
            )?),
            other => {
                return Err(Error::unexpected("server packet", format!("packet kind {other}")));
            }
        };
        Ok(response)
    }
}

fn read_block<R: Read>(
    reader: &mut Reader<R>,
    revision: u64,
    compression: Compression,
    packet: &str,
) -> Result<Block> {
    reader
        .string()
        .read_context(&format!("{packet}: read table name"))?;
    if !compression.is_enabled() {
        return Block::read(reader, revision).map_err(|e| e.within(packet));
    }

    let mut frames = CompressedReader::new(reader.get_mut());
    let block = Block::read(&mut Reader::new(&mut frames), revision)
        .map_err(|e| unwrap_frame_error(e.within(packet)))?;
    if frames.remaining() != 0 {
        return Err(ProtocolError::Compression(format!(
            "{} bytes left in frame after {packet} block",
            frames.remaining()
        ))
        .into());
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use crate::{
        block::Column,
        protocol::testing::{ServerScript, server_hello},
    };

    use super::*;

    fn read_one(bytes: &[u8], revision: u64, compression: Compression) -> Result<Response> {
        Response::read(&mut Reader::new(bytes), revision, compression)
    }

    #[test]
    fn current_server_hello() {
        let bytes = server_hello("ClickHouse", CLIENT_REVISION + 1);
        let Response::Hello(info) = read_one(&bytes, CLIENT_REVISION, Compression::None).unwrap()
        else {
            panic!("expected hello");
        };
        assert_eq!(info.name, "ClickHouse");
        assert_eq!(info.timezone.as_deref(), Some("UTC"));
        assert_eq!(info.display_name.as_deref(), Some("server-1"));
        assert_eq!(info.version_patch, 3);
        assert_eq!(info.password_rules.len(), 1);
        assert_eq!(info.negotiated_revision(), CLIENT_REVISION);
        assert_eq!(info.version(), "24.8.3");
    }

    #[test]
    fn old_server_hello_stops_early() {
        let bytes = server_hello("ClickHouse", revision::SERVER_TIMEZONE);
        let Response::Hello(info) = read_one(&bytes, CLIENT_REVISION, Compression::None).unwrap()
        else {
            panic!("expected hello");
        };
        assert_eq!(info.timezone.as_deref(), Some("UTC"));
        assert_eq!(info.display_name, None);
        assert_eq!(info.version_patch, revision::SERVER_TIMEZONE);
        assert_eq!(info.negotiated_revision(), revision::SERVER_TIMEZONE);
    }

    #[test]
    fn truncated_timezone_names_the_field() {
        let mut bytes = server_hello("ClickHouse", revision::SERVER_TIMEZONE);
        bytes.truncate(bytes.len() - 2);
        let err = read_one(&bytes, CLIENT_REVISION, Compression::None).unwrap_err();
        match err {
            Error::Read { location, .. } => {
                assert_eq!(location, "ServerInfo: could not read server timezone")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn progress_fields_follow_revision() {
        let mut script = ServerScript::new(revision::CLIENT_WRITE_INFO);
        script.progress(10, 100, 1000);
        let Response::Progress(progress) =
            read_one(&script.into_bytes(), revision::CLIENT_WRITE_INFO, Compression::None).unwrap()
        else {
            panic!("expected progress");
        };
        assert_eq!(progress.rows, 10);
        assert_eq!(progress.written_rows, 0);
        assert_eq!(progress.elapsed_ns, 0);

        let mut total = Progress::default();
        total.merge(&progress);
        total.merge(&Progress {
            elapsed_ns: 5,
            ..progress
        });
        assert_eq!(total.rows, 20);
        assert_eq!(total.elapsed_ns, 5);
    }

    #[test]
    fn compressed_data_block() {
        let block = Block::new(vec![Column::from_values("s", "String", ["a", "b"]).unwrap()]).unwrap();
        let mut script = ServerScript::new(CLIENT_REVISION).compressed(Compression::Lz4);
        script.data(&block).end_of_stream();
        let bytes = script.into_bytes();

        let mut reader = Reader::new(&bytes[..]);
        match Response::read(&mut reader, CLIENT_REVISION, Compression::Lz4).unwrap() {
            Response::Data(decoded) => assert_eq!(decoded, block),
            other => panic!("unexpected {}", other.kind()),
        }
        assert!(matches!(
            Response::read(&mut reader, CLIENT_REVISION, Compression::Lz4).unwrap(),
            Response::EndOfStream
        ));
    }

    #[test]
    fn log_block_is_never_compressed() {
        let block = Block::new(vec![Column::from_values("text", "String", ["hi"]).unwrap()]).unwrap();
        let mut script = ServerScript::new(CLIENT_REVISION);
        script.log(&block);
        match read_one(&script.into_bytes(), CLIENT_REVISION, Compression::Lz4).unwrap() {
            Response::Log(decoded) => assert_eq!(decoded.rows(), 1),
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn unknown_packet_kind() {
        let err = read_one(&[42], CLIENT_REVISION, Compression::None).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnexpectedPacket { .. })
        ));
    }

    #[test]
    fn table_columns_are_skipped() {
        let mut script = ServerScript::new(CLIENT_REVISION);
        script.table_columns().pong();
        let bytes = script.into_bytes();
        let mut reader = Reader::new(&bytes[..]);
        assert!(matches!(
            Response::read(&mut reader, CLIENT_REVISION, Compression::None).unwrap(),
            Response::TableColumns
        ));
        assert!(matches!(
            Response::read(&mut reader, CLIENT_REVISION, Compression::None).unwrap(),
            Response::Pong
        ));
    }
}
