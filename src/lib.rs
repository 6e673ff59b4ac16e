//! Modbus RTU slave with callback-driven register banks.
//!
//! The crate serves the four standard Modbus banks (coils, discrete inputs,
//! holding registers, input registers) over a serial line or any other
//! [`FrameTransport`]. Cells are sparse, may carry read/write callbacks, and
//! externally driven writes land in a drainable change log.
//!
//! ```no_run
//! use std::time::Duration;
//! use modslave::{Activity, RtuSlave, SerialConfig, SerialTransport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = SerialTransport::open(&SerialConfig::new("/dev/ttyUSB0", 9600))?;
//! let mut slave = RtuSlave::new(transport, [1]);
//! slave.store_mut().add_holding_registers(0, &[321, 123])?;
//!
//! loop {
//!     if slave.process_one(Duration::from_millis(500)).await? == Activity::Handled {
//!         // drain slave.store().changed_holding_registers() here
//!     }
//! }
//! # }
//! ```

pub mod codec;
pub mod crc;
pub mod frame;
pub mod server;
pub mod setup;
pub mod store;
pub mod transport;

// Re-export the embedder-facing surface for convenience
pub use frame::{ExceptionCode, FrameError, FunctionCode, Operation};
pub use server::{Activity, RtuSlave, ServerError};
pub use setup::{BitBlock, StoreSetup, WordBlock};
pub use store::{
    BankKind, Change, HookError, ReadHook, RegisterStore, StoreError, WriteHook,
};
pub use transport::{FrameTransport, Parity, SerialConfig, SerialTransport};
