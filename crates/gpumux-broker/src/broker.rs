//! The broker: receive-dispatch-respond loop in the trusted zone.
//!
//! One `Broker` owns everything that used to be global state in
//! predecessor designs: the tenant connections, the handle table, the
//! device context, and the shutdown flag. A termination signal flips
//! the flag through a process-wide atomic; the loop notices at its
//! next receive timeout and unwinds in reverse initialization order —
//! handles, then context, then transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gpumux_proto::{ErrorKind, Frame, Payload};
use gpumux_transport::{Transport, TransportError};

use crate::device::GpuDriver;
use crate::dispatch::{Outcome, dispatch};
use crate::error::BrokerError;
use crate::handle_table::{HandleTable, TableStats};

/// Total receive budget per sweep over all connections (~1 s), which
/// bounds how stale the shutdown flag can get.
const SWEEP_TIMEOUT_MS: i32 = 1000;

/// Emit handle-table statistics after this many processed requests.
const STATS_INTERVAL: u64 = 100;

/// Retries before a response to a non-draining tenant is dropped.
const SEND_RETRIES: u32 = 50;

/// The trusted-zone request broker.
pub struct Broker<D: GpuDriver> {
    connections: Vec<Transport>,
    table: HandleTable<D::Allocation>,
    driver: D,
    shutdown: Arc<AtomicBool>,
    processed: u64,
    torn_down: bool,
}

impl<D: GpuDriver> Broker<D> {
    /// Initialize the broker over already-opened server-role
    /// connections.
    ///
    /// Runs the device bring-up sequence: query the device count
    /// (must be at least 1), select device 0, create the context. Any
    /// failure is fatal; the caller exits non-zero.
    pub fn start(connections: Vec<Transport>, mut driver: D) -> Result<Self, BrokerError> {
        if connections.is_empty() {
            return Err(BrokerError::NoConnections);
        }

        let table = HandleTable::new();

        let device_count = driver.device_count()?;
        if device_count == 0 {
            return Err(BrokerError::NoDevice);
        }
        driver.select_device(0)?;
        driver.create_context()?;

        tracing::info!(
            device_count,
            device = %driver.device_name(),
            tenants = connections.len(),
            "broker ready"
        );

        Ok(Self {
            connections,
            table,
            driver,
            shutdown: Arc::new(AtomicBool::new(false)),
            processed: 0,
            torn_down: false,
        })
    }

    /// The process-wide shutdown flag. A signal handler (or a test)
    /// stores `true`; the loop exits at its next timeout.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Snapshot of handle-table statistics.
    #[must_use]
    pub fn stats(&self) -> TableStats {
        self.table.stats()
    }

    /// Run the receive-dispatch-respond loop until shutdown.
    ///
    /// Malformed frames are dropped with a warning and the loop
    /// continues: a hostile tenant corrupting its own ring only hurts
    /// itself. (The alternative conforming behavior, treating ring
    /// corruption as fatal, is not taken here.)
    pub fn run(&mut self) -> Result<(), BrokerError> {
        let per_conn_timeout =
            (SWEEP_TIMEOUT_MS / self.connections.len() as i32).max(1);

        while !self.shutdown.load(Ordering::SeqCst) {
            for index in 0..self.connections.len() {
                match self.connections[index].recv(per_conn_timeout) {
                    Ok(frame) => self.handle_frame(index, &frame),
                    Err(TransportError::TimedOut) => {},
                    Err(TransportError::InvalidFrame(err)) => {
                        tracing::warn!(connection = index, %err, "dropping malformed frame");
                    },
                    Err(err) => {
                        tracing::error!(connection = index, %err, "transport failed");
                        return Err(err.into());
                    },
                }
            }
        }

        tracing::info!("shutdown requested");
        self.teardown();
        Ok(())
    }

    /// Validate, dispatch, and answer one frame.
    fn handle_frame(&mut self, index: usize, frame: &Frame) {
        let connection_zone = self.connections[index].remote_zone();
        let request_seq = frame.header.seq_num();

        // The ring itself authenticates the tenant: only the zone the
        // connection was opened for can reach it. A header claiming a
        // different source zone is a spoof attempt and is judged by
        // the connection, not by its own claim.
        let outcome = if frame.header.src_zone() != connection_zone {
            tracing::warn!(
                claimed = %frame.header.src_zone(),
                actual = %connection_zone,
                "source zone spoof rejected"
            );
            Outcome::err(ErrorKind::InvalidFrame, "source zone mismatch")
        } else {
            match frame.header.kind() {
                None => Outcome::err(
                    ErrorKind::Unknown,
                    format!("unknown message kind {:#06x}", frame.header.kind_raw()),
                ),
                Some(kind) if kind.is_response() => {
                    Outcome::err(ErrorKind::InvalidFrame, "response kind sent as request")
                },
                Some(_) => match Payload::from_frame(frame) {
                    Ok(payload) => {
                        dispatch(connection_zone, &payload, &self.table, &mut self.driver)
                    },
                    Err(err) => {
                        tracing::warn!(zone = %connection_zone, %err, "unparseable payload");
                        Outcome::err(ErrorKind::InvalidFrame, err.to_string())
                    },
                },
            }
        };

        self.respond(index, request_seq, outcome);

        self.processed += 1;
        if self.processed % STATS_INTERVAL == 0 {
            let stats = self.table.stats();
            tracing::info!(
                processed = self.processed,
                handles = stats.handles,
                bytes = stats.bytes,
                "broker statistics"
            );
        }
    }

    /// Serialize and send one outcome, retrying while the tenant's rx
    /// ring is full.
    fn respond(&mut self, index: usize, request_seq: u64, outcome: Outcome) {
        let reply = self.connections[index].build(outcome.into_payload(request_seq));

        for _ in 0..SEND_RETRIES {
            match self.connections[index].send(&reply) {
                Ok(()) => return,
                Err(TransportError::RingFull) => {
                    std::thread::sleep(Duration::from_millis(1));
                },
                Err(err) => {
                    tracing::error!(connection = index, %err, "response send failed");
                    return;
                },
            }
        }
        tracing::warn!(
            connection = index,
            request_seq,
            "dropping response, tenant is not draining its ring"
        );
    }

    /// Release handles, destroy the context, close the transport — the
    /// reverse of initialization order. Idempotent.
    fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let resources = self.table.drain();
        let released = resources.len();
        for resource in &resources {
            if let Err(err) = self.driver.free(resource) {
                tracing::error!(%err, "device free failed during shutdown");
            }
        }

        self.driver.destroy_context();
        for connection in &mut self.connections {
            connection.close();
        }

        tracing::info!(released, "broker stopped");
    }
}

impl<D: GpuDriver> Drop for Broker<D> {
    fn drop(&mut self) {
        // Covers panic unwinds and callers that never reached run();
        // teardown is idempotent.
        self.teardown();
    }
}
