//! A Modbus TCP to Modbus RTU gateway using [Tokio](https://docs.rs/tokio)
//! and Rust's `async/await` syntax.
//!
//! The gateway accepts any number of concurrent Modbus TCP connections and
//! forwards their register requests to a single field device behind a
//! half-duplex serial line. A broker task serializes the requests so that
//! at most one transaction occupies the bus at a time, in arrival order.
//!
//! # Features
//!
//! * Panic-free parsing of both MBAP and RTU framing
//! * FIFO scheduling across all TCP sessions
//! * One automatic retry of transport-level failures, in place at the
//!   front of the queue
//! * Request validation before anything reaches the serial bus
//!
//! # Supported functions
//!
//! * Read Holding Registers (0x03)
//! * Read Input Registers (0x04)
//! * Write Single Register (0x06)
//! * Write Multiple Registers (0x10)
//!
//! Anything else is answered with an ILLEGAL FUNCTION exception.

/// typed register access on top of the broker
pub mod bank;
/// the transaction queue and its worker task
pub mod broker;
/// limits defined by the Modbus specification
pub mod constants;
/// error types
pub mod error;
/// Modbus exception codes
pub mod exception;
/// the serial side: RTU framing and the port-per-transaction link
pub mod serial;
/// the TCP side: MBAP framing and the session server
pub mod tcp;
/// public API types
pub mod types;

pub(crate) mod common;
