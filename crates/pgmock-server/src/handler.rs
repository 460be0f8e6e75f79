use anyhow::Context;
use pgmock_core::{fingerprint, type_oid, ResponseProvider};
use pgmock_protocol::messages::{
    CommandComplete, DataRow, Describe, Parse, ParameterDescription, Query, ReadyForQuery,
    RowDescription,
};
use pgmock_protocol::{BackendMessage, WireCodec};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};

/// Answers queries from canned responses. Shared by every session.
#[derive(Clone)]
pub struct Handler {
    provider: Arc<dyn ResponseProvider>,
}

impl Handler {
    pub fn new(provider: Arc<dyn ResponseProvider>) -> Self {
        Self { provider }
    }

    /// Writes the registered result set for the query's fingerprint. A missing
    /// response is returned as an error and nothing is written.
    pub async fn handle_query<S: AsyncWrite + Unpin>(
        &self,
        wire: &mut WireCodec<S>,
        query: &Query,
    ) -> anyhow::Result<()> {
        metrics::counter!("pgmock_queries_total").increment(1);
        let hash = fingerprint(&query.sql);
        let response = match self.provider.lookup(&hash) {
            Ok(response) => response,
            Err(err) => {
                metrics::counter!("pgmock_query_lookup_miss_total").increment(1);
                warn!(fingerprint = %hash, sql = %query.sql, "no canned response");
                return Err(err.into());
            }
        };
        debug!(fingerprint = %hash, rows = response.rows.len(), "answering query");

        BackendMessage::RowDescription(RowDescription {
            fields: response.columns,
        })
        .encode(wire)?;
        for values in response.rows {
            BackendMessage::DataRow(DataRow { values }).encode(wire)?;
        }
        // Tagged `SELECT 1` independent of the row count.
        let mut complete = CommandComplete::new();
        complete.select_or_create(1);
        BackendMessage::CommandComplete(complete).encode(wire)?;
        BackendMessage::ReadyForQuery(ReadyForQuery::idle()).encode(wire)?;
        wire.flush().await.context("writing query result")?;
        Ok(())
    }

    /// Parse is acknowledged without looking at the SQL.
    pub async fn handle_parse<S: AsyncWrite + Unpin>(
        &self,
        wire: &mut WireCodec<S>,
        parse: &Parse,
    ) -> anyhow::Result<()> {
        debug!(statement = %parse.statement, sql = %parse.sql, "parse");
        BackendMessage::ParseComplete.encode(wire)?;
        wire.flush().await?;
        Ok(())
    }

    /// Every statement or portal is described as taking a single INT4.
    pub async fn handle_describe<S: AsyncWrite + Unpin>(
        &self,
        wire: &mut WireCodec<S>,
        describe: &Describe,
    ) -> anyhow::Result<()> {
        debug!(kind = ?describe.target, name = %describe.name, "describe");
        BackendMessage::ParameterDescription(ParameterDescription {
            type_oids: vec![type_oid::INT4],
        })
        .encode(wire)?;
        wire.flush().await?;
        Ok(())
    }
}
