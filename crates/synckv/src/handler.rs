//! Dispatch of incoming peer requests.
//!
//! `Put` and `BulkApply` mutate tables and are handled in arrival order;
//! everything else may run concurrently with them.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use synckv_core::{ExportLeaf, RawRow};
use synckv_store::{successor, Store};
use synckv_sync::{Incoming, NodeId, Reconciler, Request, Response, RpcChannel, RpcErrorCode};

use crate::error::Result;
use crate::registry::Tables;
use crate::table::VersionedTable;

/// Whether `request` must be handled in arrival order.
pub(crate) fn is_ordered(request: &Request) -> bool {
    matches!(request, Request::Put { .. } | Request::BulkApply { .. })
}

/// Serves the RPC surface for one node.
pub(crate) struct Handler<S, C> {
    tables: Arc<Tables<S, C>>,
    channel: Arc<C>,
    reconciler: Arc<Reconciler<Tables<S, C>, C>>,
    chunk_size: usize,
}

impl<S, C> Handler<S, C>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    pub(crate) fn new(
        tables: Arc<Tables<S, C>>,
        channel: Arc<C>,
        reconciler: Arc<Reconciler<Tables<S, C>, C>>,
    ) -> Self {
        let chunk_size = reconciler.config().chunk_size;
        Self {
            tables,
            channel,
            reconciler,
            chunk_size,
        }
    }

    /// Handle one request and answer it if the sender is waiting.
    pub(crate) async fn handle(&self, incoming: Incoming) {
        let Incoming {
            from,
            request,
            reply,
        } = incoming;
        let kind = request.kind();
        trace!(peer = %from, kind, "incoming request");

        let response = match request.validate_limits() {
            Err(reason) => {
                warn!(peer = %from, kind, reason, "rejected oversized request");
                Response::Error {
                    code: RpcErrorCode::MessageTooLarge,
                    message: reason.to_string(),
                }
            }
            Ok(()) => match self.dispatch(from, request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(peer = %from, kind, error = %e, "request failed");
                    Response::Error {
                        code: e.code(),
                        message: e.to_string(),
                    }
                }
            },
        };

        if let Some(reply) = reply {
            if let Err(e) = reply.respond(response) {
                debug!(peer = %from, kind, error = %e, "could not answer request");
            }
        }
    }

    async fn dispatch(&self, from: NodeId, request: Request) -> Result<Response> {
        match request {
            Request::Put { table, row } => {
                let table = self.tables.open(&table).await?;
                table.apply_raw_row(row).await?;
                Ok(Response::Ack)
            }

            Request::GetValue { table, key } => match self.tables.get(&table).await {
                Some(table) => Ok(Response::Value(table.latest_row(&key).await?)),
                None => Ok(Response::Value(None)),
            },

            Request::GetStats => Ok(Response::Stats(self.tables.stats().await?)),

            Request::GetLeaves { table } => match self.tables.get(&table).await {
                Some(table) => Ok(Response::Leaves(Some(table.export_leaves().await))),
                None => Ok(Response::Leaves(None)),
            },

            Request::GetFullTable { table } => {
                self.stream(from, table, None).await;
                Ok(Response::Ack)
            }

            Request::GetPartialTable { table, leaves } => {
                self.stream(from, table, Some(leaves)).await;
                Ok(Response::Ack)
            }

            Request::BulkApply { table, rows, last } => {
                let name = table;
                let table = self.tables.open(&name).await?;
                let mut applied = 0usize;
                for row in rows {
                    if table.apply_raw_row(row).await? {
                        applied += 1;
                    }
                }
                trace!(table = %name, peer = %from, applied, last, "applied chunk");
                if last {
                    self.reconciler.complete(&name, &from).await;
                }
                Ok(Response::Ack)
            }
        }
    }

    /// Stream a table (or some of its buckets) back to `peer` as `BulkApply`.
    ///
    /// Runs until the last chunk is handed to the transport.
    async fn stream(&self, peer: NodeId, name: String, leaves: Option<Vec<ExportLeaf>>) {
        let Some(table) = self.tables.get(&name).await else {
            debug!(table = %name, peer = %peer, "stream requested for a table we do not hold");
            return;
        };
        let channel = self.channel.as_ref();

        let result = match leaves {
            None => stream_full(&table, channel, &peer, self.chunk_size).await,
            Some(leaves) => stream_partial(&table, channel, &peer, &leaves, self.chunk_size).await,
        };
        match result {
            Ok(rows) => debug!(table = %name, peer = %peer, rows, "served table stream"),
            Err(e) => warn!(table = %name, peer = %peer, error = %e, "table stream aborted"),
        }
    }
}

async fn send_chunk<C: RpcChannel>(
    channel: &C,
    peer: &NodeId,
    table: &str,
    rows: Vec<RawRow>,
    last: bool,
) -> Result<()> {
    let request = Request::BulkApply {
        table: table.to_string(),
        rows,
        last,
    };
    channel.send(peer, request).await?;
    Ok(())
}

/// Page through the whole table. Returns the number of rows sent.
async fn stream_full<S, C>(
    table: &VersionedTable<S, C>,
    channel: &C,
    peer: &NodeId,
    chunk_size: usize,
) -> Result<usize>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    let mut from = Vec::new();
    let mut sent = 0;
    loop {
        let page = table.scan_rows(&from, chunk_size).await?;
        // A short page ends the stream; a full one may be followed by an empty last chunk.
        let last = page.len() < chunk_size;
        if let Some(row) = page.last() {
            from = successor(row.key.as_bytes());
        }
        sent += page.len();
        send_chunk(channel, peer, table.name(), page, last).await?;
        if last {
            return Ok(sent);
        }
    }
}

/// Send the rows of the given buckets. Returns the number of rows sent.
async fn stream_partial<S, C>(
    table: &VersionedTable<S, C>,
    channel: &C,
    peer: &NodeId,
    leaves: &[ExportLeaf],
    chunk_size: usize,
) -> Result<usize>
where
    S: Store + 'static,
    C: RpcChannel + 'static,
{
    let rows = table.rows_for_leaves(leaves).await?;
    let sent = rows.len();
    if rows.is_empty() {
        send_chunk(channel, peer, table.name(), Vec::new(), true).await?;
        return Ok(0);
    }

    let mut chunks = rows.chunks(chunk_size).peekable();
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        send_chunk(channel, peer, table.name(), chunk.to_vec(), last).await?;
    }
    Ok(sent)
}
