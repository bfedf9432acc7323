//! Fieldbus access used by the poller.
//!
//! [`Fieldbus`] opens one session per poll cycle; the session reads a holding
//! register block from each slot in turn. [`TcpFieldbus`] talks Modbus TCP;
//! tests substitute scripted implementations.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use robolink_common::SlotId;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::debug;

use crate::poller::PollerError;

/// Connection factory for a controller network.
#[async_trait]
pub trait Fieldbus: Send + Sync {
    /// Open a session. Failure aborts the whole poll cycle.
    async fn connect(&self) -> Result<Box<dyn FieldbusSession>, PollerError>;
}

/// One open connection to the controller network.
#[async_trait]
pub trait FieldbusSession: Send {
    /// Read `count` holding registers starting at address 0 from `slot`.
    async fn read_holding_block(&mut self, slot: SlotId, count: u16) -> Result<Vec<u16>, PollerError>;

    /// Close the connection.
    async fn disconnect(self: Box<Self>);
}

/// Modbus TCP gateway reachable at `host:port`.
#[derive(Debug, Clone)]
pub struct TcpFieldbus {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpFieldbus {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, PollerError> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| PollerError::Connection(format!("Cannot resolve {}: {}", self.host, e)))?;
        addrs.next().ok_or_else(|| {
            PollerError::Connection(format!("No address found for {}", self.host))
        })
    }
}

#[async_trait]
impl Fieldbus for TcpFieldbus {
    async fn connect(&self) -> Result<Box<dyn FieldbusSession>, PollerError> {
        let addr = tokio::time::timeout(self.timeout, self.resolve())
            .await
            .map_err(|_| PollerError::Connection("Address lookup timeout".to_string()))??;

        let ctx = tokio::time::timeout(self.timeout, tcp::connect(addr))
            .await
            .map_err(|_| PollerError::Connection(format!("Connection timeout to {}", addr)))?
            .map_err(|e| PollerError::Connection(format!("{}: {}", addr, e)))?;

        debug!(%addr, "Connected to controller gateway");
        Ok(Box::new(TcpSession {
            ctx,
            timeout: self.timeout,
        }))
    }
}

struct TcpSession {
    ctx: Context,
    timeout: Duration,
}

#[async_trait]
impl FieldbusSession for TcpSession {
    async fn read_holding_block(&mut self, slot: SlotId, count: u16) -> Result<Vec<u16>, PollerError> {
        self.ctx.set_slave(Slave(slot.get()));

        let read_error = |reason: String| PollerError::Read { slot, reason };

        tokio::time::timeout(self.timeout, self.ctx.read_holding_registers(0, count))
            .await
            .map_err(|_| read_error("Read timeout".to_string()))?
            .map_err(|e| read_error(e.to_string()))?
            .map_err(|e| read_error(format!("Exception: {:?}", e)))
    }

    async fn disconnect(mut self: Box<Self>) {
        if let Err(e) = self.ctx.disconnect().await {
            debug!(error = %e, "Error closing controller connection");
        }
    }
}
