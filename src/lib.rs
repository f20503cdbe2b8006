//! `sr-over-udp` — Selective Repeat reliable data transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!   application: send(msg) -> bool            handler(msg), in order
//!        │                                          ▲
//!  ┌─────▼──────────────────────────────────────────┴─────┐
//!  │                     SrConnection                     │
//!  │  ┌──────────────┐  ┌────────────┐  ┌──────────────┐  │
//!  │  │   SrSender   │  │ TimerWheel │  │  SrReceiver  │  │
//!  │  │ (SlotWindow) │◀─│ timer task │  │ (SlotWindow) │  │
//!  │  └──────┬───────┘  └────────────┘  └──────▲───────┘  │
//!  │         │  DATA / retransmit      ACK  ▲  │ DATA     │
//!  └─────────┼──────────────────────────────┼──┼──────────┘
//!            ▼                              │  │ receive task
//!  ┌──────────────────────────────────────────────────────┐
//!  │        Transport (UdpTransport / SimTransport)       │
//!  └──────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]         — wire format and checksum
//! - [`window`]         — circular slot array and wrapping sequence arithmetic
//! - [`sr_sender`]      — outbound window: per-packet ACK and timer
//! - [`sr_receiver`]    — inbound window: buffering and in-order delivery
//! - [`timer`]          — min-heap of retransmission deadlines
//! - [`sr_connection`]  — protocol instance: dispatcher, timer task, shutdown
//! - [`state`]          — instance lifecycle
//! - [`config`]         — tunable parameters
//! - [`transport`]      — the unreliable datagram contract
//! - [`socket`]         — UDP implementation of the transport
//! - [`simulator`]      — fault injection and in-memory transport for tests

pub mod config;
pub mod packet;
pub mod simulator;
pub mod socket;
pub mod sr_connection;
pub mod sr_receiver;
pub mod sr_sender;
pub mod state;
pub mod timer;
pub mod transport;
pub mod window;

pub use config::Config;
pub use packet::{MessageType, Packet};
pub use sr_connection::{SrConnection, SrError};
pub use state::ConnectionState;
pub use transport::{Transport, TransportError};
