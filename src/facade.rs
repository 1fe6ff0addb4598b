//! Ergonomic top-level engine types (§9 supplement): thin composition
//! wrappers over [`client::ClientFsm`](crate::client::ClientFsm) and
//! [`server::ServerFsm`](crate::server::ServerFsm) that own their pool /
//! storage table and expose exactly the entry points §5 calls for
//! (`poll`, `poll_with_budget`) plus the client/server-specific surface
//! (`submit`/`cancel`/`submit_poison`, `add_region`/`set_guard`). No new
//! protocol behavior lives here; it mirrors the role `GatewayLite` plays
//! over the lower-level pieces in the teacher.

#[cfg(feature = "role-client")]
use crate::client::{ClientFsm, ClientHandle};
#[cfg(feature = "role-server")]
use crate::config::RegionConfig;
#[cfg(feature = "role-client")]
use crate::config::EngineConfig;
#[cfg(feature = "role-server")]
use crate::config::StorageLayout;
use crate::error::Result;
use crate::framing::FramingMode;
#[cfg(feature = "role-server")]
use crate::server::{AllowAll, RegisterStore, ServerFsm, WriteGuard};
use crate::transport::Transport;
#[cfg(feature = "role-client")]
use crate::types::{Priority, Status};
use crate::types::TimeMs;

/// Master-role facade: one transaction pool plus one [`ClientFsm`].
#[cfg(feature = "role-client")]
pub struct ModbusClient<const NPOOL: usize = 4, const NHIGH: usize = 4, const NNORMAL: usize = 8> {
    fsm: ClientFsm<NPOOL, NHIGH, NNORMAL>,
}

#[cfg(feature = "role-client")]
impl<const NPOOL: usize, const NHIGH: usize, const NNORMAL: usize> ModbusClient<NPOOL, NHIGH, NNORMAL> {
    pub fn new(mode: FramingMode, config: EngineConfig) -> Self {
        Self {
            fsm: ClientFsm::new(mode, config),
        }
    }

    pub fn submit(&mut self, unit_id: u8, function: u8, payload: &[u8], now_ms: TimeMs) -> Result<ClientHandle> {
        self.fsm.submit(unit_id, function, payload, now_ms)
    }

    /// Submits a request with an explicit timeout override, an optional
    /// caller-assigned priority, and an optional deadline in milliseconds —
    /// both consulted only by the `QosPolicy` variants that use them
    /// (`Application`, `DeadlineBased`, `Hybrid`).
    #[allow(clippy::too_many_arguments)]
    pub fn submit_with_timeout(
        &mut self,
        unit_id: u8,
        function: u8,
        payload: &[u8],
        timeout_ms: u32,
        now_ms: TimeMs,
        explicit_priority: Option<Priority>,
        deadline_ms: Option<u64>,
    ) -> Result<ClientHandle> {
        self.fsm.submit_with_timeout(
            unit_id,
            function,
            payload,
            timeout_ms,
            now_ms,
            explicit_priority,
            deadline_ms,
        )
    }

    pub fn cancel(&mut self, handle: ClientHandle) {
        self.fsm.cancel(handle)
    }

    /// Drains every queued transaction (the in-flight one, if any, still
    /// runs to completion first) with `status=Cancelled` (§4.3.1).
    pub fn submit_poison(&mut self) {
        self.fsm.submit_poison()
    }

    pub fn release(&mut self, handle: ClientHandle) {
        self.fsm.release(handle)
    }

    pub fn response(&self, handle: ClientHandle) -> Option<&[u8]> {
        self.fsm.response(handle)
    }

    pub fn status(&self, handle: ClientHandle) -> Option<Status> {
        self.fsm.status(handle)
    }

    pub fn poll<T: Transport>(&mut self, transport: &mut T, now_ms: TimeMs) -> Option<(ClientHandle, Status)> {
        self.fsm.poll(transport, now_ms)
    }

    /// Drives up to `budget` poll iterations in one call, invoking
    /// `on_complete` for each transaction that reaches a terminal state.
    /// Stops early once the engine has nothing left to do. Returns the
    /// number of completions delivered.
    pub fn poll_with_budget<T: Transport>(
        &mut self,
        transport: &mut T,
        now_ms: TimeMs,
        budget: usize,
        mut on_complete: impl FnMut(ClientHandle, Status),
    ) -> usize {
        let mut completed = 0;
        for _ in 0..budget {
            match self.fsm.poll(transport, now_ms) {
                Some((handle, status)) => {
                    on_complete(handle, status);
                    completed += 1;
                }
                None => {
                    if !self.fsm.in_flight() && self.fsm.queue_depth() == 0 {
                        break;
                    }
                }
            }
        }
        completed
    }

    pub fn in_flight(&self) -> bool {
        self.fsm.in_flight()
    }

    pub fn queue_depth(&self) -> usize {
        self.fsm.queue_depth()
    }

    pub fn diagnostics(&self) -> &crate::diag::Diagnostics<32> {
        &self.fsm.diag
    }
}

/// Slave-role facade: one storage layout plus one [`ServerFsm`].
#[cfg(feature = "role-server")]
pub struct ModbusServer<S: RegisterStore, G: WriteGuard = AllowAll, const NREGIONS: usize = 8> {
    fsm: ServerFsm<S, G, NREGIONS>,
}

#[cfg(feature = "role-server")]
impl<S: RegisterStore, G: WriteGuard, const NREGIONS: usize> ModbusServer<S, G, NREGIONS> {
    pub fn new(mode: FramingMode, unit_id: u8, store: S, guard: G, layout: StorageLayout<NREGIONS>) -> Self {
        Self {
            fsm: ServerFsm::new(mode, unit_id, store, guard, layout),
        }
    }

    /// Registers an additional storage region after construction.
    pub fn register_region(&mut self, region: RegionConfig) -> Result<()> {
        self.fsm.add_region(region)
    }

    /// Replaces the write-veto callback.
    pub fn register_callback(&mut self, guard: G) {
        self.fsm.set_guard(guard)
    }

    pub fn poll<T: Transport>(&mut self, transport: &mut T, now_ms: TimeMs) -> bool {
        self.fsm.poll(transport, now_ms)
    }

    /// Drives up to `budget` poll iterations, stopping early once a call
    /// observes nothing pending. Returns the number of request/response
    /// cycles completed (including applied, response-less broadcasts).
    pub fn poll_with_budget<T: Transport>(&mut self, transport: &mut T, now_ms: TimeMs, budget: usize) -> usize {
        let mut completed = 0;
        for _ in 0..budget {
            if self.fsm.poll(transport, now_ms) {
                completed += 1;
            } else {
                break;
            }
        }
        completed
    }

    pub fn diagnostics(&self) -> &crate::diag::Diagnostics<32> {
        &self.fsm.diag
    }
}

#[cfg(all(test, feature = "tcp", feature = "role-client"))]
mod client_tests {
    use super::*;
    use crate::transport::loopback::LoopbackTransport;

    #[test]
    fn poll_with_budget_stops_once_idle() {
        let config = EngineConfig::builder().build().unwrap();
        let mut client: ModbusClient<4, 4, 4> = ModbusClient::new(FramingMode::Tcp, config);
        let mut transport: LoopbackTransport<64> = LoopbackTransport::new();

        assert!(client
            .submit(1, crate::pdu::fc::READ_HOLDING_REGISTERS, &[0, 0, 0, 1], 0)
            .is_ok());

        let mut seen = 0;
        let completed = client.poll_with_budget(&mut transport, 0, 8, |_, _| seen += 1);
        // no peer ever answers, so nothing completes within this budget and
        // the loop runs the full budget while the transaction is in flight
        assert_eq!(completed, 0);
        assert_eq!(seen, 0);
    }
}
