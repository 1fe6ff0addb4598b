//! Client (master) state machine (§4.3.1): `Idle -> Preparing -> Sending ->
//! Waiting -> {Idle | Backoff}`. One request is on the wire at a time per
//! [`ClientFsm`] instance, matching a single serial port or TCP connection;
//! run one instance per physical link.

use crate::config::EngineConfig;
use crate::diag::{Diagnostics, TraceTag};
use crate::error::ModbusError;
use crate::framing::{encode_frame, try_decode_frame, FrameResult, FramingMode};
use crate::pool::Pool;
use crate::qos::QosDispatcher;
use crate::transport::Transport;
use crate::types::{AduView, ClientState, Priority, Status, TimeMs, MAX_ASCII_FRAME, MAX_PAYLOAD_LEN};
use tracing::{debug, trace, warn};

/// Opaque handle returned by [`ClientFsm::submit`]; pass it back to
/// [`ClientFsm::poll_result`] and [`ClientFsm::release`].
pub type ClientHandle = usize;

#[derive(Clone, Copy)]
struct Transaction {
    state: ClientState,
    unit_id: u8,
    function: u8,
    request: [u8; MAX_PAYLOAD_LEN],
    request_len: usize,
    response: [u8; MAX_PAYLOAD_LEN],
    response_len: usize,
    tid: u16,
    retries_left: u8,
    timeout_ms: u32,
    sent_at_ms: TimeMs,
    broadcast: bool,
    status: Option<Status>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            state: ClientState::Idle,
            unit_id: 0,
            function: 0,
            request: [0; MAX_PAYLOAD_LEN],
            request_len: 0,
            response: [0; MAX_PAYLOAD_LEN],
            response_len: 0,
            tid: 0,
            retries_left: 0,
            timeout_ms: 0,
            sent_at_ms: 0,
            broadcast: false,
            status: None,
        }
    }
}

/// Default per-FC timeout in milliseconds. Writes get a shorter budget than
/// reads of the maximum register count (§6.3 `per_fc_timeout_ms`).
fn default_timeout_for_fc(function: u8) -> u32 {
    match function & 0x7F {
        0x01..=0x04 => 300,
        0x05 | 0x06 => 200,
        0x0F | 0x10 | 0x17 => 400,
        _ => 300,
    }
}

/// The client (master) protocol engine. `NPOOL` bounds concurrently
/// tracked transactions (only one is ever "on the wire"; the rest sit
/// queued or are completed-but-unretrieved). `NHIGH`/`NNORMAL` bound the QoS
/// queues.
pub struct ClientFsm<const NPOOL: usize, const NHIGH: usize, const NNORMAL: usize> {
    mode: FramingMode,
    config: EngineConfig,
    pool: Pool<Transaction, NPOOL>,
    dispatch: QosDispatcher<usize, NHIGH, NNORMAL>,
    recv_buf: [u8; MAX_ASCII_FRAME],
    recv_len: usize,
    active: Option<usize>,
    next_tid: u16,
    poison: bool,
    pub diag: Diagnostics<32>,
}

impl<const NPOOL: usize, const NHIGH: usize, const NNORMAL: usize> ClientFsm<NPOOL, NHIGH, NNORMAL> {
    pub fn new(mode: FramingMode, config: EngineConfig) -> Self {
        Self {
            mode,
            config,
            pool: Pool::new(),
            dispatch: QosDispatcher::new(),
            recv_buf: [0; MAX_ASCII_FRAME],
            recv_len: 0,
            active: None,
            next_tid: 1,
            poison: false,
            diag: Diagnostics::new(),
        }
    }

    fn mint_tid(&mut self) -> u16 {
        let tid = self.next_tid;
        self.next_tid = if self.next_tid == u16::MAX {
            1
        } else {
            self.next_tid + 1
        };
        tid
    }

    /// Submits a request with the engine's default per-FC timeout and a
    /// QoS-policy-derived priority. Broadcast (`unit_id == 0`) writes
    /// complete as soon as the frame is sent, since no response is expected.
    pub fn submit(
        &mut self,
        unit_id: u8,
        function: u8,
        payload: &[u8],
        now_ms: TimeMs,
    ) -> Result<ClientHandle, ModbusError> {
        self.submit_with_timeout(
            unit_id,
            function,
            payload,
            default_timeout_for_fc(function),
            now_ms,
            None,
            None,
        )
    }

    /// Submits a request with an explicit timeout override, an optional
    /// caller-assigned priority (consulted by [`crate::types::QosPolicy::Application`]
    /// and [`crate::types::QosPolicy::Hybrid`]), and an optional deadline in
    /// milliseconds (consulted by `DeadlineBased`/`Hybrid`).
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
    ) -> Result<ClientHandle, ModbusError> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ModbusError::InvalidArgument);
        }
        let priority = self
            .config
            .qos_policy
            .classify(function, explicit_priority, deadline_ms, now_ms);

        let mut txn = Transaction {
            state: ClientState::Preparing,
            unit_id,
            function,
            request_len: payload.len(),
            tid: self.mint_tid(),
            retries_left: self.config.max_retries,
            timeout_ms,
            broadcast: unit_id == 0,
            ..Transaction::default()
        };
        txn.request[..payload.len()].copy_from_slice(payload);

        let idx = self.pool.acquire(txn).ok_or(ModbusError::NoResources)?;
        self.dispatch
            .submit(priority, idx)
            .map_err(|_| ModbusError::Busy)?;
        self.diag.record(now_ms, TraceTag::RequestSubmitted, function as u32);
        trace!(unit_id, function, idx, "request submitted");
        Ok(idx)
    }

    /// Cancels a queued or in-flight transaction. Already-completed
    /// transactions are unaffected; call [`Self::release`] for those.
    pub fn cancel(&mut self, handle: ClientHandle) {
        if let Some(txn) = self.pool.get_mut(handle) {
            if txn.status.is_none() {
                txn.status = Some(Status::Cancelled);
                txn.state = ClientState::Idle;
            }
        }
        if self.active == Some(handle) {
            self.active = None;
        }
    }

    /// Requests a poison-pill drain (§4.3.1): the in-flight transaction (if
    /// any) is allowed to finish, then every queued transaction is drained
    /// from the QoS queues with `status=Cancelled`, one per [`Self::poll`]
    /// call, until the queue is empty and the FSM settles back to `Idle`.
    /// Idempotent: calling it again while a drain is in progress is a no-op.
    pub fn submit_poison(&mut self) {
        self.poison = true;
    }

    /// Frees a completed transaction's pool slot. Must be called after
    /// consuming its result via [`Self::poll_result`] / [`Self::response`].
    pub fn release(&mut self, handle: ClientHandle) {
        self.pool.release(handle);
    }

    /// Borrows the response payload of a completed transaction.
    pub fn response(&self, handle: ClientHandle) -> Option<&[u8]> {
        self.pool.get(handle).and_then(|t| {
            if t.status == Some(Status::Ok) {
                Some(&t.response[..t.response_len])
            } else {
                None
            }
        })
    }

    pub fn status(&self, handle: ClientHandle) -> Option<Status> {
        self.pool.get(handle).and_then(|t| t.status)
    }

    /// Drives the state machine one step: advances the active transaction
    /// (sending, waiting, retrying) and, if idle, promotes the next queued
    /// transaction. Returns `Some((handle, status))` exactly once per
    /// transaction, the moment it reaches a terminal state.
    pub fn poll<T: Transport>(&mut self, transport: &mut T, now_ms: TimeMs) -> Option<(ClientHandle, Status)> {
        if self.active.is_none() && self.poison {
            return match self.dispatch.next() {
                Some(idx) => {
                    if let Some(txn) = self.pool.get_mut(idx) {
                        txn.status = Some(Status::Cancelled);
                        txn.state = ClientState::Idle;
                    }
                    Some((idx, Status::Cancelled))
                }
                None => {
                    self.poison = false;
                    None
                }
            };
        }

        if self.active.is_none() {
            if let Some(idx) = self.dispatch.next() {
                self.active = Some(idx);
                self.recv_len = 0;
            }
        }

        let idx = self.active?;
        let state = self.pool.get(idx)?.state;

        match state {
            ClientState::Preparing | ClientState::Sending => {
                if self.send_active(idx, transport, now_ms).is_some() {
                    return self.finish_active(idx);
                }
            }
            ClientState::Waiting => {
                if self.receive_active(idx, transport, now_ms) {
                    return self.finish_active(idx);
                }
                if self.check_timeout(idx, now_ms) {
                    return self.finish_active(idx);
                }
            }
            ClientState::Backoff => {
                let txn = self.pool.get(idx)?;
                if now_ms.saturating_sub(txn.sent_at_ms) >= self.config.retry_backoff_ms as u64 {
                    self.pool.get_mut(idx)?.state = ClientState::Sending;
                }
            }
            ClientState::Idle => {}
        }
        None
    }

    fn finish_active(&mut self, idx: usize) -> Option<(ClientHandle, Status)> {
        let txn = self.pool.get(idx)?;
        let status = txn.status?;
        self.active = None;
        Some((idx, status))
    }

    /// Encodes (if not already pending) and attempts to send the active
    /// transaction's frame. Returns `Some(())` once it completes terminally
    /// (transport failure, or immediate completion for a broadcast write).
    fn send_active<T: Transport>(&mut self, idx: usize, transport: &mut T, now_ms: TimeMs) -> Option<()> {
        let mut frame = [0u8; MAX_ASCII_FRAME];
        let len = {
            let txn = self.pool.get(idx)?;
            let adu = AduView::new(txn.unit_id, txn.function, &txn.request[..txn.request_len]);
            match encode_frame(self.mode, txn.tid, adu, &mut frame) {
                Ok(n) => n,
                Err(_) => {
                    let txn = self.pool.get_mut(idx)?;
                    txn.status = Some(Status::Transport);
                    return Some(());
                }
            }
        };

        match transport.send(&frame[..len]) {
            Ok(n) if n == len => {
                let txn = self.pool.get_mut(idx)?;
                txn.sent_at_ms = now_ms;
                if txn.broadcast {
                    txn.status = Some(Status::Ok);
                    return Some(());
                }
                txn.state = ClientState::Waiting;
                None
            }
            Ok(_) => None, // partial write; try again next poll
            Err(_) => {
                let txn = self.pool.get_mut(idx)?;
                txn.status = Some(Status::Transport);
                Some(())
            }
        }
    }

    /// Pulls any available bytes into the accumulator and attempts a
    /// decode. Returns `true` once the transaction reaches a terminal
    /// state (success, protocol exception, or unrecoverable framing error).
    fn receive_active<T: Transport>(&mut self, idx: usize, transport: &mut T, now_ms: TimeMs) -> bool {
        let n = match transport.recv(&mut self.recv_buf[self.recv_len..]) {
            Ok(n) => n,
            Err(_) => {
                if let Some(txn) = self.pool.get_mut(idx) {
                    txn.status = Some(Status::Transport);
                }
                return true;
            }
        };
        self.recv_len += n;

        match try_decode_frame(self.mode, &self.recv_buf[..self.recv_len]) {
            FrameResult::Incomplete => false,
            FrameResult::Invalid => {
                self.recv_len = 0;
                false // keep waiting for a cleaner frame / the timeout to fire
            }
            FrameResult::Frame { tid, adu, consumed } => {
                let accept = match self.pool.get(idx) {
                    Some(txn) => {
                        let tid_ok = match self.mode {
                            #[cfg(feature = "tcp")]
                            FramingMode::Tcp => tid == Some(txn.tid),
                            #[cfg(any(feature = "rtu", feature = "ascii"))]
                            _ => true,
                        };
                        tid_ok && adu.unit_id == txn.unit_id
                    }
                    None => false,
                };

                if !accept {
                    // not our reply (stale TID / wrong unit); drop, count it, and keep waiting.
                    self.diag.record(now_ms, TraceTag::FrameRejected, adu.function as u32);
                    debug!(unit_id = adu.unit_id, tid = ?tid, "dropped reply with mismatched tid/unit");
                    let remaining = self.recv_len - consumed;
                    self.recv_buf.copy_within(consumed..self.recv_len, 0);
                    self.recv_len = remaining;
                    return false;
                }

                let txn = match self.pool.get_mut(idx) {
                    Some(t) => t,
                    None => return true,
                };
                if adu.is_exception() {
                    let code = adu.payload.first().copied().unwrap_or(0);
                    txn.status = Some(Status::Exception(code));
                } else {
                    txn.response_len = adu.payload.len().min(MAX_PAYLOAD_LEN);
                    txn.response[..txn.response_len].copy_from_slice(&adu.payload[..txn.response_len]);
                    txn.status = Some(Status::Ok);
                }
                self.diag.record(now_ms, TraceTag::RequestCompleted, adu.function as u32);
                trace!(idx, function = adu.function, "response received");
                self.recv_len = 0;
                true
            }
        }
    }

    fn check_timeout(&mut self, idx: usize, now_ms: TimeMs) -> bool {
        let txn = match self.pool.get_mut(idx) {
            Some(t) => t,
            None => return true,
        };
        if now_ms.saturating_sub(txn.sent_at_ms) < txn.timeout_ms as u64 {
            return false;
        }
        if txn.retries_left > 0 {
            txn.retries_left -= 1;
            txn.state = ClientState::Backoff;
            self.diag.record(now_ms, TraceTag::RequestRetried, txn.function as u32);
            debug!(idx, retries_left = txn.retries_left, "request timed out, retrying");
            self.recv_len = 0;
            false
        } else {
            txn.status = Some(Status::Timeout);
            self.diag.record(now_ms, TraceTag::RequestTimedOut, txn.function as u32);
            warn!(idx, "request timed out, retries exhausted");
            true
        }
    }

    pub fn in_flight(&self) -> bool {
        self.active.is_some()
    }

    pub fn queue_depth(&self) -> usize {
        self.dispatch.high_len() + self.dispatch.normal_len()
    }
}

#[cfg(all(test, feature = "tcp"))]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackTransport;

    struct PairedLoopback {
        to_server: heapless::Deque<u8, 512>,
        to_client: heapless::Deque<u8, 512>,
        now: TimeMs,
    }

    struct ClientSide<'a>(&'a mut PairedLoopback);
    struct ServerSide<'a>(&'a mut PairedLoopback);

    impl Transport for ClientSide<'_> {
        fn send(&mut self, data: &[u8]) -> Result<usize, ModbusError> {
            let mut n = 0;
            for &b in data {
                if self.0.to_server.push_back(b).is_err() {
                    break;
                }
                n += 1;
            }
            Ok(n)
        }
        fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ModbusError> {
            let mut n = 0;
            while n < buf.len() {
                match self.0.to_client.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
        fn now_ms(&self) -> TimeMs {
            self.0.now
        }
    }

    impl Transport for ServerSide<'_> {
        fn send(&mut self, data: &[u8]) -> Result<usize, ModbusError> {
            let mut n = 0;
            for &b in data {
                if self.0.to_client.push_back(b).is_err() {
                    break;
                }
                n += 1;
            }
            Ok(n)
        }
        fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ModbusError> {
            let mut n = 0;
            while n < buf.len() {
                match self.0.to_server.pop_front() {
                    Some(b) => {
                        buf[n] = b;
                        n += 1;
                    }
                    None => break,
                }
            }
            Ok(n)
        }
        fn now_ms(&self) -> TimeMs {
            self.0.now
        }
    }

    #[test]
    fn round_trip_over_tcp_completes_with_matching_tid() {
        let mut link = PairedLoopback {
            to_server: heapless::Deque::new(),
            to_client: heapless::Deque::new(),
            now: 0,
        };
        let config = EngineConfig::builder().build().unwrap();
        let mut client: ClientFsm<4, 4, 4> = ClientFsm::new(FramingMode::Tcp, config);

        let handle = client
            .submit(1, crate::pdu::fc::READ_HOLDING_REGISTERS, &[0, 0, 0, 2], 0)
            .unwrap();

        {
            let mut side = ClientSide(&mut link);
            assert!(client.poll(&mut side, 0).is_none()); // sends, moves to Waiting
        }

        // Inspect what went out and hand back a canned response with the
        // same transaction id.
        let mut raw = [0u8; 32];
        let mut side = ServerSide(&mut link);
        let n = side.recv(&mut raw).unwrap();
        let (header, req_adu) = crate::framing::mbap::decode(&raw[..n]).unwrap();
        assert_eq!(req_adu.function, crate::pdu::fc::READ_HOLDING_REGISTERS);

        let mut resp_payload = [0u8; 8];
        let resp_len = crate::pdu::build_registers_response(&[11, 22], &mut resp_payload).unwrap();
        let resp_adu = AduView::new(1, crate::pdu::fc::READ_HOLDING_REGISTERS, &resp_payload[..resp_len]);
        let mut resp_frame = [0u8; 32];
        let fn_len = crate::framing::mbap::encode(header.transaction_id, resp_adu, &mut resp_frame).unwrap();
        side.send(&resp_frame[..fn_len]).unwrap();

        let mut side = ClientSide(&mut link);
        let (done_handle, status) = client.poll(&mut side, 10).expect("should complete");
        assert_eq!(done_handle, handle);
        assert_eq!(status, Status::Ok);
        let regs = crate::pdu::parse_registers_response(client.response(handle).unwrap(), 2).unwrap();
        assert_eq!(regs.get(0), Some(11));
        assert_eq!(regs.get(1), Some(22));
    }

    #[test]
    fn submit_poison_drains_queued_transactions() {
        let config = EngineConfig::builder().build().unwrap();
        let mut client: ClientFsm<4, 4, 4> = ClientFsm::new(FramingMode::Tcp, config);
        let mut transport: LoopbackTransport<8> = LoopbackTransport::new();

        let handle_a = client
            .submit(1, crate::pdu::fc::READ_HOLDING_REGISTERS, &[0, 0, 0, 1], 0)
            .unwrap();
        let handle_b = client
            .submit(1, crate::pdu::fc::READ_INPUT_REGISTERS, &[0, 0, 0, 1], 0)
            .unwrap();
        client.submit_poison();

        let (first, status) = client.poll(&mut transport, 0).expect("drains first queued item");
        assert_eq!(first, handle_a);
        assert_eq!(status, Status::Cancelled);

        let (second, status) = client.poll(&mut transport, 0).expect("drains second queued item");
        assert_eq!(second, handle_b);
        assert_eq!(status, Status::Cancelled);

        assert!(client.poll(&mut transport, 0).is_none()); // queue empty, poison cleared
        assert!(!client.in_flight());
    }

    /// Duplicate suppression is a server-side property over incoming frames
    /// (spec.md §4.3.3), not a client-submission throttle: two identical
    /// submissions within the configured window must both be accepted.
    #[test]
    fn identical_submissions_are_not_throttled() {
        let config = EngineConfig::builder().dup_filter_window_ms(1_000).build().unwrap();
        let mut client: ClientFsm<4, 4, 4> = ClientFsm::new(FramingMode::Tcp, config);

        let first = client
            .submit(1, crate::pdu::fc::READ_HOLDING_REGISTERS, &[0, 0, 0, 1], 0)
            .unwrap();
        let second = client
            .submit(1, crate::pdu::fc::READ_HOLDING_REGISTERS, &[0, 0, 0, 1], 1)
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(client.queue_depth(), 2);
    }
}
