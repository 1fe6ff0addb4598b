//! Server (slave) state machine (§4.3.2): `Idle -> Receiving -> Processing
//! -> Responding -> Idle`. Dispatches by function code against a
//! caller-provided [`RegisterStore`], honoring unit-id filtering,
//! read-only regions, and an optional write veto.

use crate::config::{RegionConfig, StorageLayout};
use crate::error::ModbusError;
use crate::diag::{Diagnostics, TraceTag};
use crate::framing::{encode_frame, try_decode_frame, FrameResult, FramingMode};
#[cfg(feature = "rtu")]
use crate::framing::{resync::ResyncScanner, rtu};
use crate::pdu::{self, fc};
use crate::qos::DuplicateFilter;
use crate::transport::Transport;
#[cfg(feature = "rtu")]
use crate::types::MAX_RTU_FRAME;
use crate::types::{AduView, DataClass, ServerState, TimeMs, MAX_ASCII_FRAME, MAX_PAYLOAD_LEN};
use tracing::{debug, trace};

/// Backing storage the server dispatches reads/writes against. Implemented
/// by the caller over whatever actually holds the data (a `[u16; N]`
/// register file, a memory-mapped peripheral, etc).
pub trait RegisterStore {
    fn read_coil(&self, address: u16) -> bool;
    fn write_coil(&mut self, address: u16, value: bool);
    fn read_discrete_input(&self, address: u16) -> bool;
    fn read_holding_register(&self, address: u16) -> u16;
    fn write_holding_register(&mut self, address: u16, value: u16);
    fn read_input_register(&self, address: u16) -> u16;
}

/// Vetoes writes before they reach the [`RegisterStore`] (§4.3.2 "callback
/// veto"). Return `Err(exception_code)` to reject; the default [`AllowAll`]
/// accepts everything.
pub trait WriteGuard {
    fn allow_write(&mut self, class: DataClass, address: u16, quantity: u16) -> Result<(), u8>;
}

/// No-op [`WriteGuard`] that allows every write; the default for
/// [`ServerFsm`] when no veto policy is needed.
pub struct AllowAll;

impl WriteGuard for AllowAll {
    fn allow_write(&mut self, _class: DataClass, _address: u16, _quantity: u16) -> Result<(), u8> {
        Ok(())
    }
}

/// The server (slave) protocol engine. `unit_id` is the address this
/// instance answers to (plus the universal broadcast address 0).
/// `NREGIONS` bounds the storage layout; `G` is the write-veto policy.
pub struct ServerFsm<S: RegisterStore, G: WriteGuard = AllowAll, const NREGIONS: usize = 8> {
    mode: FramingMode,
    unit_id: u8,
    state: ServerState,
    store: S,
    guard: G,
    layout: StorageLayout<NREGIONS>,
    dup_filter: DuplicateFilter<16>,
    recv_buf: [u8; MAX_ASCII_FRAME],
    recv_len: usize,
    #[cfg(feature = "rtu")]
    resync: ResyncScanner<256>,
    #[cfg(feature = "rtu")]
    resyncing: bool,
    pub diag: Diagnostics<32>,
}

impl<S: RegisterStore, G: WriteGuard, const NREGIONS: usize> ServerFsm<S, G, NREGIONS> {
    pub fn new(mode: FramingMode, unit_id: u8, store: S, guard: G, layout: StorageLayout<NREGIONS>) -> Self {
        Self::with_dup_filter_window(mode, unit_id, store, guard, layout, 500)
    }

    /// Like [`Self::new`], with an explicit duplicate-filter window
    /// (default 500 ms per §3 `dup_window_ms`).
    pub fn with_dup_filter_window(
        mode: FramingMode,
        unit_id: u8,
        store: S,
        guard: G,
        layout: StorageLayout<NREGIONS>,
        dup_filter_window_ms: u64,
    ) -> Self {
        Self {
            mode,
            unit_id,
            state: ServerState::Idle,
            store,
            guard,
            layout,
            dup_filter: DuplicateFilter::new(dup_filter_window_ms),
            recv_buf: [0; MAX_ASCII_FRAME],
            recv_len: 0,
            #[cfg(feature = "rtu")]
            resync: ResyncScanner::new(),
            #[cfg(feature = "rtu")]
            resyncing: false,
            diag: Diagnostics::new(),
        }
    }

    /// Resync scanner counters (§4.1.5): `resync_attempts`, `bytes_discarded`,
    /// `frames_recovered`. `None` when the `rtu` feature is disabled.
    #[cfg(feature = "rtu")]
    pub fn resync_stats(&self) -> (u64, u64, u64) {
        (
            self.resync.resync_attempts,
            self.resync.bytes_discarded,
            self.resync.frames_recovered,
        )
    }

    /// Adds a storage region to the layout after construction. Fails with
    /// [`ModbusError::NoResources`] once `NREGIONS` regions are configured.
    pub fn add_region(&mut self, region: RegionConfig) -> Result<(), ModbusError> {
        self.layout.add_region(region)
    }

    /// Replaces the write-veto callback.
    pub fn set_guard(&mut self, guard: G) {
        self.guard = guard;
    }

    /// Borrows the backing store, e.g. for test assertions or a diagnostics
    /// dump that needs to read register state directly.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutably borrows the backing store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Drives the state machine one step. Returns `true` if a response (or
    /// a processed broadcast with no response) was completed this call.
    pub fn poll<T: Transport>(&mut self, transport: &mut T, now_ms: TimeMs) -> bool {
        let n = match transport.recv(&mut self.recv_buf[self.recv_len..]) {
            Ok(n) => n,
            Err(_) => return false,
        };
        self.recv_len += n;
        if self.recv_len > 0 {
            self.state = ServerState::Receiving;
        }

        #[cfg(feature = "rtu")]
        if self.resyncing && self.mode == FramingMode::Rtu {
            return self.poll_resync(transport, now_ms);
        }

        let (tid, request_adu_owned, consumed) = match try_decode_frame(self.mode, &self.recv_buf[..self.recv_len]) {
            FrameResult::Incomplete => return false,
            FrameResult::Invalid => {
                self.diag.record(now_ms, TraceTag::FrameRejected, 0);
                debug!("rejected frame: checksum or structure mismatch");
                let rejected_len = self.recv_len;
                #[cfg(feature = "rtu")]
                if self.mode == FramingMode::Rtu {
                    self.resync.feed(&self.recv_buf[..rejected_len]);
                    self.recv_len = 0;
                    self.resyncing = true;
                    return self.poll_resync(transport, now_ms);
                }
                self.recv_len = 0;
                self.state = ServerState::Idle;
                return false;
            }
            FrameResult::Frame { tid, adu, consumed } => {
                let mut payload = [0u8; MAX_PAYLOAD_LEN];
                let len = adu.payload.len();
                payload[..len].copy_from_slice(adu.payload);
                (tid, (adu.unit_id, adu.function, payload, len), consumed)
            }
        };
        let remaining = self.recv_len - consumed;
        self.recv_buf.copy_within(consumed..self.recv_len, 0);
        self.recv_len = remaining;

        let (unit_id, function, payload, payload_len) = request_adu_owned;
        self.process_request(transport, tid, unit_id, function, &payload[..payload_len], now_ms)
    }

    /// Resync path (§4.1.5): feeds the accumulator, attempts to recover a
    /// CRC-valid frame from the garbage prefix, and dispatches it the same
    /// way a cleanly-decoded frame would be. Stays in resync mode, with no
    /// response sent, until a candidate validates or the buffer runs dry.
    #[cfg(feature = "rtu")]
    fn poll_resync<T: Transport>(&mut self, transport: &mut T, now_ms: TimeMs) -> bool {
        if self.recv_len > 0 {
            self.resync.feed(&self.recv_buf[..self.recv_len]);
            self.recv_len = 0;
        }

        let mut recovered = [0u8; MAX_RTU_FRAME];
        let len = match self.resync.try_recover(&mut recovered) {
            Some(len) => len,
            None => return false,
        };

        self.diag.record(
            now_ms,
            TraceTag::ResyncRecovered,
            self.resync.frames_recovered as u32,
        );
        debug!(
            bytes_discarded = self.resync.bytes_discarded,
            "resync scanner recovered a frame"
        );

        let adu = match rtu::decode(&recovered[..len]) {
            Ok(adu) => adu,
            Err(_) => return false,
        };
        let mut payload = [0u8; MAX_PAYLOAD_LEN];
        let payload_len = adu.payload.len();
        payload[..payload_len].copy_from_slice(adu.payload);
        let (unit_id, function) = (adu.unit_id, adu.function);

        self.resyncing = !self.resync.is_empty();
        self.process_request(transport, None, unit_id, function, &payload[..payload_len], now_ms)
    }

    /// Applies the duplicate filter and unit-id filter to a decoded request,
    /// dispatches it against the storage layout, and sends the response (or
    /// exception) frame. Shared by the normal decode path and the resync
    /// recovery path so both dispatch identically.
    fn process_request<T: Transport>(
        &mut self,
        transport: &mut T,
        tid: Option<u16>,
        unit_id: u8,
        function: u8,
        payload: &[u8],
        now_ms: TimeMs,
    ) -> bool {
        if self.dup_filter.check_and_record(unit_id, function, payload, now_ms) {
            self.diag.record(now_ms, TraceTag::DuplicateSuppressed, function as u32);
            debug!(unit_id, function, "dropped duplicate frame");
            self.state = ServerState::Idle;
            return false;
        }

        if unit_id != self.unit_id && unit_id != 0 {
            self.diag.record(now_ms, TraceTag::Filtered, unit_id as u32);
            debug!(unit_id, "dropped frame addressed to a different unit");
            self.state = ServerState::Idle;
            return false; // not addressed to us
        }

        self.state = ServerState::Processing;
        self.diag.record(now_ms, TraceTag::ServerDispatch, function as u32);
        trace!(unit_id, function, "dispatching request");

        let mut resp_payload = [0u8; MAX_PAYLOAD_LEN];
        let dispatch = self.dispatch(function, payload, &mut resp_payload);

        let broadcast = unit_id == 0;
        self.state = ServerState::Responding;

        match dispatch {
            Ok(resp_len) => {
                if broadcast {
                    // §4.3.2: broadcast writes are applied but never answered.
                    self.state = ServerState::Idle;
                    return true;
                }
                let adu = AduView::new(self.unit_id, function, &resp_payload[..resp_len]);
                self.send_frame(transport, tid.unwrap_or(0), adu);
            }
            Err(code) => {
                self.diag.record(now_ms, TraceTag::ServerException, code as u32);
                debug!(function, exception_code = code, "dispatch returned exception");
                if broadcast {
                    self.state = ServerState::Idle;
                    return true;
                }
                let mut exc = [0u8; 2];
                let n = pdu::build_exception(function, code, &mut exc).unwrap_or(0);
                let adu = AduView::new(self.unit_id, exc[0], &exc[1..n]);
                self.send_frame(transport, tid.unwrap_or(0), adu);
            }
        }

        self.state = ServerState::Idle;
        true
    }

    fn send_frame<T: Transport>(&mut self, transport: &mut T, tid: u16, adu: AduView<'_>) {
        let mut frame = [0u8; MAX_ASCII_FRAME];
        if let Ok(len) = encode_frame(self.mode, tid, adu, &mut frame) {
            let _ = transport.send(&frame[..len]);
        }
    }

    /// Dispatches one request payload against the storage layout, writing
    /// the response payload into `out` and returning its length, or the
    /// exception code to send back (§4.2, §4.3.2).
    fn dispatch(&mut self, function: u8, payload: &[u8], out: &mut [u8]) -> Result<usize, u8> {
        match function {
            fc::READ_COILS | fc::READ_DISCRETE_INPUTS => {
                let (address, quantity) = pdu::parse_read_request(function, payload)?;
                let class = if function == fc::READ_COILS {
                    DataClass::Coils
                } else {
                    DataClass::DiscreteInputs
                };
                self.require_region(class, address, quantity, false)?;
                let mut bits = [false; 2000];
                for i in 0..quantity as usize {
                    bits[i] = if function == fc::READ_COILS {
                        self.store.read_coil(address + i as u16)
                    } else {
                        self.store.read_discrete_input(address + i as u16)
                    };
                }
                pdu::build_bits_response(&bits[..quantity as usize], out).map_err(|_| 0x04)
            }
            fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS => {
                let (address, quantity) = pdu::parse_read_request(function, payload)?;
                let class = if function == fc::READ_HOLDING_REGISTERS {
                    DataClass::HoldingRegisters
                } else {
                    DataClass::InputRegisters
                };
                self.require_region(class, address, quantity, false)?;
                let mut regs = [0u16; 125];
                for i in 0..quantity as usize {
                    regs[i] = if function == fc::READ_HOLDING_REGISTERS {
                        self.store.read_holding_register(address + i as u16)
                    } else {
                        self.store.read_input_register(address + i as u16)
                    };
                }
                pdu::build_registers_response(&regs[..quantity as usize], out).map_err(|_| 0x04)
            }
            fc::WRITE_SINGLE_COIL => {
                let (address, value) = pdu::parse_write_single_coil(payload)?;
                self.require_region(DataClass::Coils, address, 1, true)?;
                self.guard.allow_write(DataClass::Coils, address, 1)?;
                self.store.write_coil(address, value);
                pdu::build_write_single_coil(address, value, out).map_err(|_| 0x04)
            }
            fc::WRITE_SINGLE_REGISTER => {
                let (address, value) = pdu::parse_write_single_register(payload)?;
                self.require_region(DataClass::HoldingRegisters, address, 1, true)?;
                self.guard.allow_write(DataClass::HoldingRegisters, address, 1)?;
                self.store.write_holding_register(address, value);
                pdu::build_write_single_register(address, value, out).map_err(|_| 0x04)
            }
            fc::WRITE_MULTIPLE_COILS => {
                let mut bits = [false; 1968];
                let (address, quantity) = pdu::parse_write_multiple_coils(payload, &mut bits)?;
                self.require_region(DataClass::Coils, address, quantity, true)?;
                self.guard.allow_write(DataClass::Coils, address, quantity)?;
                for i in 0..quantity as usize {
                    self.store.write_coil(address + i as u16, bits[i]);
                }
                pdu::build_write_multiple_response(address, quantity, out).map_err(|_| 0x04)
            }
            fc::WRITE_MULTIPLE_REGISTERS => {
                let (address, regs) = pdu::parse_write_multiple_registers(payload)?;
                let quantity = regs.len() as u16;
                self.require_region(DataClass::HoldingRegisters, address, quantity, true)?;
                self.guard.allow_write(DataClass::HoldingRegisters, address, quantity)?;
                for (i, value) in regs.iter().enumerate() {
                    self.store.write_holding_register(address + i as u16, value);
                }
                pdu::build_write_multiple_response(address, quantity, out).map_err(|_| 0x04)
            }
            fc::READ_WRITE_MULTIPLE_REGISTERS => {
                let req = pdu::parse_read_write_multiple_registers(payload)?;
                self.require_region(
                    DataClass::HoldingRegisters,
                    req.write_address,
                    req.write_values.len() as u16,
                    true,
                )?;
                self.require_region(DataClass::HoldingRegisters, req.read_address, req.read_quantity, false)?;
                self.guard.allow_write(
                    DataClass::HoldingRegisters,
                    req.write_address,
                    req.write_values.len() as u16,
                )?;
                for (i, value) in req.write_values.iter().enumerate() {
                    self.store.write_holding_register(req.write_address + i as u16, value);
                }
                let mut regs = [0u16; 125];
                for i in 0..req.read_quantity as usize {
                    regs[i] = self.store.read_holding_register(req.read_address + i as u16);
                }
                pdu::build_registers_response(&regs[..req.read_quantity as usize], out).map_err(|_| 0x04)
            }
            _ => Err(0x01), // IllegalFunction
        }
    }

    /// Checks the request against the storage layout. Both "no region
    /// configured for this range" and "write against a read-only region" map
    /// to IllegalDataAddress, per §4.3.2's RO-region rejection rule. Reads
    /// are always allowed against a matching region regardless of its
    /// `read_only` flag.
    fn require_region(&self, class: DataClass, address: u16, quantity: u16, write: bool) -> Result<(), u8> {
        match self.layout.find(class, address, quantity) {
            Some(region) if write && region.read_only => Err(0x02),
            Some(_) => Ok(()),
            None => Err(0x02),
        }
    }
}
