use std::io::Write;

use log::warn;

use crate::{
    Result,
    binary::Writer,
    block::Block,
    error::WriteContext,
    settings::{Parameters, Settings, quote},
};

use super::{
    CLIENT_VERSION_MAJOR, CLIENT_VERSION_MINOR, CLIENT_VERSION_PATCH, STAGE_COMPLETE,
    client_packet, compression::{self, Compression},
    revision::{self, CLIENT_REVISION},
};

/// Identity of the client attached to every query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub client_name: String,
    pub os_user: String,
    pub hostname: String,
    pub quota_key: String,
}

const QUERY_KIND_INITIAL: u8 = 1;
const INTERFACE_TCP: u8 = 1;

impl ClientInfo {
    pub fn new(client_name: impl Into<String>) -> Self {
        let from_env = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| std::env::var(name).ok())
                .unwrap_or_default()
        };
        Self {
            client_name: client_name.into(),
            os_user: from_env(&["USER", "USERNAME"]),
            hostname: from_env(&["HOSTNAME", "COMPUTERNAME"]),
            quota_key: String::new(),
        }
    }

    fn write<W: Write>(&self, writer: &mut Writer<W>, revision: u64) -> std::io::Result<()> {
        writer.u8(QUERY_KIND_INITIAL)?;
        writer.string("")?; // initial user
        writer.string("")?; // initial query id
        writer.string("0.0.0.0:0")?;
        if revision >= revision::INITIAL_QUERY_START_TIME {
            writer.u64(0)?;
        }
        writer.u8(INTERFACE_TCP)?;
        writer.string(&self.os_user)?;
        writer.string(&self.hostname)?;
        writer.string(&self.client_name)?;
        writer.uvarint(CLIENT_VERSION_MAJOR)?;
        writer.uvarint(CLIENT_VERSION_MINOR)?;
        writer.uvarint(CLIENT_REVISION)?;
        if revision >= revision::QUOTA_KEY_IN_CLIENT_INFO {
            writer.string(&self.quota_key)?;
        }
        if revision >= revision::DISTRIBUTED_DEPTH {
            writer.uvarint(0)?;
        }
        if revision >= revision::VERSION_PATCH {
            writer.uvarint(CLIENT_VERSION_PATCH)?;
        }
        if revision >= revision::OPENTELEMETRY {
            writer.u8(0)?;
        }
        if revision >= revision::PARALLEL_REPLICAS {
            writer.uvarint(0)?; // collaborate with initiator
            writer.uvarint(0)?; // count participating replicas
            writer.uvarint(0)?; // number of current replica
        }
        Ok(())
    }
}

/// Packets sent by the client.
#[derive(Debug)]
pub enum Request<'a> {
    Hello {
        client_name: &'a str,
        database: &'a str,
        user: &'a str,
        password: &'a str,
    },
    /// Sent right after the server Hello on revisions that expect it. Carries no tag.
    Addendum { quota_key: &'a str },
    Query {
        query_id: &'a str,
        client_info: &'a ClientInfo,
        settings: &'a Settings,
        parameters: &'a Parameters,
        sql: &'a str,
    },
    Data { table: &'a str, block: &'a Block },
    Cancel,
    Ping,
}

impl Request<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "Hello",
            Request::Addendum { .. } => "Addendum",
            Request::Query { .. } => "Query",
            Request::Data { .. } => "Data",
            Request::Cancel => "Cancel",
            Request::Ping => "Ping",
        }
    }

    pub(crate) fn write<W: Write>(
        &self,
        writer: &mut Writer<W>,
        revision: u64,
        compression: Compression,
    ) -> Result<()> {
        match self {
            Request::Hello {
                client_name,
                database,
                user,
                password,
            } => write_hello(writer, client_name, database, user, password)
                .write_context("hello: write client hello"),
            Request::Addendum { quota_key } => {
                writer.string(quota_key).write_context("hello: write quota key")
            }
            Request::Query {
                query_id,
                client_info,
                settings,
                parameters,
                sql,
            } => write_query(
                writer,
                revision,
                compression,
                query_id,
                client_info,
                settings,
                parameters,
                sql,
            )
            .write_context("query: write query packet"),
            Request::Data { table, block } => {
                writer
                    .uvarint(client_packet::DATA)
                    .and_then(|()| writer.string(table))
                    .write_context("data: write packet header")?;
                if compression.is_enabled() {
                    let mut body = Vec::new();
                    block.write(&mut Writer::new(&mut body), revision)?;
                    compression::write_frames(writer.get_mut(), &body, compression)
                } else {
                    block.write(writer, revision)
                }
            }
            Request::Cancel => writer
                .uvarint(client_packet::CANCEL)
                .write_context("cancel: write packet"),
            Request::Ping => writer
                .uvarint(client_packet::PING)
                .write_context("ping: write packet"),
        }
    }
}

fn write_hello<W: Write>(
    writer: &mut Writer<W>,
    client_name: &str,
    database: &str,
    user: &str,
    password: &str,
) -> std::io::Result<()> {
    writer.uvarint(client_packet::HELLO)?;
    writer.string(client_name)?;
    writer.uvarint(CLIENT_VERSION_MAJOR)?;
    writer.uvarint(CLIENT_VERSION_MINOR)?;
    writer.uvarint(CLIENT_REVISION)?;
    writer.string(database)?;
    writer.string(user)?;
    writer.string(password)
}

#[allow(clippy::too_many_arguments)]
fn write_query<W: Write>(
    writer: &mut Writer<W>,
    revision: u64,
    compression: Compression,
    query_id: &str,
    client_info: &ClientInfo,
    settings: &Settings,
    parameters: &Parameters,
    sql: &str,
) -> std::io::Result<()> {
    writer.uvarint(client_packet::QUERY)?;
    writer.string(query_id)?;
    if revision >= revision::CLIENT_INFO {
        client_info.write(writer, revision)?;
    }

    if revision >= revision::SETTINGS_AS_STRINGS {
        for setting in settings.iter() {
            writer.string(&setting.name)?;
            writer.uvarint(setting.flags())?;
            writer.string(&setting.value)?;
        }
    } else if !settings.is_empty() {
        warn!("server revision {revision} predates string settings, {} settings dropped", settings.len());
    }
    writer.string("")?;

    if revision >= revision::INTERSERVER_SECRET {
        writer.string("")?;
    }
    writer.uvarint(STAGE_COMPLETE)?;
    writer.uvarint(u64::from(compression.is_enabled()))?;
    writer.string(sql)?;

    if revision >= revision::PARAMETERS {
        for (name, value) in parameters.iter() {
            writer.string(name)?;
            writer.uvarint(0x02)?;
            writer.string(&quote(value))?;
        }
        writer.string("")?;
    }
    Ok(())
}
