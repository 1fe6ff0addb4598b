//! Shared data types for the protocol engine (§3).

/// Maximum PDU payload length. A PDU is "function + payload", at most 253
/// bytes total (§3 PDU invariant), so the payload itself is at most 252.
pub const MAX_PDU_LEN: usize = 253;
pub const MAX_PAYLOAD_LEN: usize = MAX_PDU_LEN - 1;

/// Maximum RTU frame length: `unit + function + payload + crc16`.
pub const MAX_RTU_FRAME: usize = 1 + MAX_PDU_LEN + 2;

/// Maximum MBAP frame length: 7-byte header + PDU.
pub const MAX_MBAP_FRAME: usize = 7 + MAX_PDU_LEN;

/// Maximum ASCII frame length: `:` + hex(unit+fn+payload+lrc) + CRLF.
pub const MAX_ASCII_FRAME: usize = 1 + (1 + MAX_PDU_LEN + 1) * 2 + 2;

/// A read-only view of one Application Data Unit, borrowed from the
/// caller-owned buffer that produced it (§3 "ADU view").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AduView<'a> {
    pub unit_id: u8,
    pub function: u8,
    pub payload: &'a [u8],
}

impl<'a> AduView<'a> {
    pub fn new(unit_id: u8, function: u8, payload: &'a [u8]) -> Self {
        Self {
            unit_id,
            function,
            payload,
        }
    }

    /// True for the Modbus broadcast address (§3: unit id 0).
    pub fn is_broadcast(&self) -> bool {
        self.unit_id == 0
    }

    /// True if `function` carries the exception bit (§4.2).
    pub fn is_exception(&self) -> bool {
        self.function & 0x80 != 0
    }
}

/// Two-tier quality-of-service priority (§4.3.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    Normal = 0,
    High = 1,
}

/// QoS assignment policy (§4.3.4 / §6.3 `qos_policy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosPolicy {
    /// FC 05/06/08 are High, everything else Normal.
    FcBased,
    /// High iff `deadline_ms - now <= threshold_ms`.
    DeadlineBased { threshold_ms: u32 },
    /// The submitter sets the priority explicitly.
    Application,
    /// FC-based, promoted to High if the deadline predicate also holds.
    Hybrid { threshold_ms: u32 },
}

impl QosPolicy {
    /// Whether a function code is High priority under the FC-based rule.
    pub fn fc_is_high(function: u8) -> bool {
        matches!(function, 0x05 | 0x06 | 0x08)
    }

    /// Resolves the effective priority for a submission.
    pub fn classify(
        &self,
        function: u8,
        explicit: Option<Priority>,
        deadline_ms: Option<u64>,
        now_ms: u64,
    ) -> Priority {
        match self {
            QosPolicy::Application => explicit.unwrap_or(Priority::Normal),
            QosPolicy::FcBased => {
                if Self::fc_is_high(function) {
                    Priority::High
                } else {
                    Priority::Normal
                }
            }
            QosPolicy::DeadlineBased { threshold_ms } => {
                match deadline_ms {
                    Some(d) if d.saturating_sub(now_ms) <= *threshold_ms as u64 => Priority::High,
                    _ => Priority::Normal,
                }
            }
            QosPolicy::Hybrid { threshold_ms } => {
                if Self::fc_is_high(function) {
                    return Priority::High;
                }
                match deadline_ms {
                    Some(d) if d.saturating_sub(now_ms) <= *threshold_ms as u64 => Priority::High,
                    _ => Priority::Normal,
                }
            }
        }
    }
}

/// Outcome status delivered to a client callback (§4.3.1, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Timeout,
    Transport,
    Cancelled,
    Exception(u8),
}

/// Client FSM states (§4.3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Preparing,
    Sending,
    Waiting,
    Backoff,
}

/// Server FSM states (§4.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Receiving,
    Processing,
    Responding,
}

/// Which Modbus data class a region/request belongs to (§3 "Storage region").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataClass {
    Coils,
    DiscreteInputs,
    HoldingRegisters,
    InputRegisters,
}

/// Monotonic millisecond timestamp, supplied by the transport (§5).
pub type TimeMs = u64;
