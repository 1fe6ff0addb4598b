//! # modbuscore
//!
//! A transport-agnostic, non-blocking Modbus protocol engine supporting
//! Modbus RTU (CRC-framed), Modbus ASCII (LRC-framed) and Modbus TCP
//! (MBAP-framed), in both client (master) and server (slave) roles.
//!
//! The engine is designed to run unmodified on tiny microcontrollers and on
//! hosted systems serving many concurrent TCP sessions: no module on the
//! `poll()` hot path allocates, blocks, or assumes an async runtime.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        MODBUSCORE ENGINE                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 4: Facades                                                  │
//! │   • ModbusClient, ModbusServer                                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 3: State machines                                          │
//! │   • client::ClientFsm, server::ServerFsm                         │
//! │   • pool::Pool, qos::QosDispatcher, qos::DuplicateFilter         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 2: Protocol codecs                                         │
//! │   • pdu (function codes, exceptions)                             │
//! │   • framing::{rtu, ascii, mbap, resync}                          │
//! │   • checksum (CRC-16/Modbus, LRC-8)                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Layer 1: Transport                                                │
//! │   • transport::Transport (caller-supplied)                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use modbuscore::{pdu::fc, EngineConfig, FramingMode, ModbusClient};
//!
//! let config = EngineConfig::builder()
//!     .txn_pool_size(4)
//!     .default_timeout_ms(1000)
//!     .build()?;
//!
//! let mut client: ModbusClient<4, 4, 8> = ModbusClient::new(FramingMode::Tcp, config);
//! let handle = client.submit(1, fc::READ_HOLDING_REGISTERS, &[0, 0, 0, 2], now_ms())?;
//! loop {
//!     if let Some((done, status)) = client.poll(&mut my_transport, now_ms()) {
//!         assert_eq!(done, handle);
//!         break;
//!     }
//! }
//! ```
//!
//! ## Feature flags
//!
//! - `rtu` / `ascii` / `tcp`: enable the respective framer.
//! - `role-client` / `role-server`: enable the respective state machine.
//! - `std` (default): enables `std::error::Error` impls and wall-clock
//!   helpers; the crate is `no_std` otherwise.
//! - `defmt`: use `defmt` instead of `tracing` for embedded logging.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod checksum;
pub mod config;
pub mod diag;
pub mod error;
pub mod framing;
pub mod pdu;
pub mod pool;
pub mod qos;
pub mod queue;
pub mod transport;
pub mod types;

#[cfg(feature = "role-client")]
pub mod client;

#[cfg(feature = "role-server")]
pub mod server;

#[cfg(any(feature = "role-client", feature = "role-server"))]
pub mod facade;

pub use error::{ModbusError, Result};
pub use types::*;

#[cfg(feature = "role-client")]
pub use client::{ClientFsm, ClientHandle};

#[cfg(feature = "role-server")]
pub use server::{AllowAll, RegisterStore, ServerFsm, WriteGuard};

#[cfg(feature = "role-client")]
pub use facade::ModbusClient;

#[cfg(feature = "role-server")]
pub use facade::ModbusServer;

pub use config::EngineConfig;
pub use framing::FramingMode;

/// Crate version, exposed for diagnostics/handshake purposes.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
