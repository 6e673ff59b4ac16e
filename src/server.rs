//! Request dispatcher: one frame in, one response (or deliberate silence) out.
//!
//! A cycle is strictly serial: obtain a frame, classify the function code,
//! validate, touch the store, answer. Frames failing the envelope checks
//! (CRC, length, foreign slave address) are dropped without any wire
//! traffic; everything else is answered, with a Modbus exception where the
//! request cannot be honored. Write callbacks run only after the echo
//! response has been handed to the transport.

use std::time::Duration;

use log::{debug, error};
use thiserror::Error;

use crate::codec;
use crate::frame::{self, DecodeError, ExceptionCode, Frame, FunctionCode, Operation};
use crate::setup::StoreSetup;
use crate::store::{BankKind, RegisterStore, StoreError, WriteHook};
use crate::transport::FrameTransport;

/// Outcome of a single [`RtuSlave::process_one`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// A frame was consumed: answered, or deliberately dropped.
    Handled,
    /// No frame arrived within the timeout.
    Idle,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A Modbus RTU slave serving one register store on a frame transport.
///
/// Multiple servers may share one bus under different slave addresses; each
/// owns its banks outright, so they never share state.
pub struct RtuSlave<T> {
    transport: T,
    addresses: Vec<u8>,
    store: RegisterStore,
}

impl<T: FrameTransport> RtuSlave<T> {
    /// Create a slave answering on the given address set.
    pub fn new(transport: T, addresses: impl IntoIterator<Item = u8>) -> Self {
        Self {
            transport,
            addresses: addresses.into_iter().collect(),
            store: RegisterStore::new(),
        }
    }

    pub fn store(&self) -> &RegisterStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut RegisterStore {
        &mut self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn slave_addresses(&self) -> &[u8] {
        &self.addresses
    }

    /// Apply a declarative bank description, see [`StoreSetup`].
    pub fn setup_registers(
        &mut self,
        setup: &StoreSetup,
        use_defaults: bool,
    ) -> Result<(), StoreError> {
        setup.apply(&mut self.store, use_defaults)
    }

    /// Wait up to `timeout` for a request frame and run one request cycle.
    ///
    /// Only transport-level I/O failures surface as errors; protocol
    /// failures end as exception responses or silent drops.
    pub async fn process_one(&mut self, timeout: Duration) -> Result<Activity, ServerError> {
        let Some(adu) = self.transport.recv_frame(timeout).await? else {
            return Ok(Activity::Idle);
        };

        match frame::parse_adu(&adu, &self.addresses) {
            Ok(frame) => self.handle_frame(frame).await?,
            Err(reason) => debug!("dropping frame without response: {reason}"),
        }
        Ok(Activity::Handled)
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<(), ServerError> {
        let Some(function) = FunctionCode::from_u8(frame.function) else {
            debug!("unsupported function code {:#04x}", frame.function);
            return self
                .send_exception(frame.slave, frame.function, ExceptionCode::IllegalFunction)
                .await;
        };

        let operation = match frame::decode_body(function, &frame.pdu) {
            Ok(operation) => operation,
            Err(DecodeError::Malformed) => {
                debug!(
                    "malformed {:?} PDU of {} bytes, dropping",
                    function,
                    frame.pdu.len()
                );
                return Ok(());
            }
            Err(DecodeError::IllegalValue) => {
                return self
                    .send_exception(frame.slave, frame.function, ExceptionCode::IllegalDataValue)
                    .await;
            }
        };

        let slave = frame.slave;
        match operation {
            Operation::ReadCoils { start, quantity } => {
                let payload = self
                    .store
                    .read_coils_for_wire(start, quantity)
                    .map(|bits| codec::pack_bits(&bits));
                self.respond_read(slave, FunctionCode::ReadCoils, payload).await
            }
            Operation::ReadDiscreteInputs { start, quantity } => {
                let payload = self
                    .store
                    .read_discrete_inputs_for_wire(start, quantity)
                    .map(|bits| codec::pack_bits(&bits));
                self.respond_read(slave, FunctionCode::ReadDiscreteInputs, payload)
                    .await
            }
            Operation::ReadHoldingRegisters { start, quantity } => {
                let payload = self
                    .store
                    .read_holding_registers_for_wire(start, quantity)
                    .map(|words| codec::pack_words(&words));
                self.respond_read(slave, FunctionCode::ReadHoldingRegisters, payload)
                    .await
            }
            Operation::ReadInputRegisters { start, quantity } => {
                let payload = self
                    .store
                    .read_input_registers_for_wire(start, quantity)
                    .map(|words| codec::pack_words(&words));
                self.respond_read(slave, FunctionCode::ReadInputRegisters, payload)
                    .await
            }
            Operation::WriteSingleCoil { address, on } => {
                let echo = if on { 0xFF00 } else { 0x0000 };
                self.write_coils(slave, FunctionCode::WriteSingleCoil, address, &[on], echo)
                    .await
            }
            Operation::WriteSingleRegister { address, value } => {
                self.write_holdings(slave, FunctionCode::WriteSingleRegister, address, &[value], value)
                    .await
            }
            Operation::WriteMultipleCoils { start, values } => {
                let quantity = values.len() as u16;
                self.write_coils(slave, FunctionCode::WriteMultipleCoils, start, &values, quantity)
                    .await
            }
            Operation::WriteMultipleRegisters { start, values } => {
                let quantity = values.len() as u16;
                self.write_holdings(
                    slave,
                    FunctionCode::WriteMultipleRegisters,
                    start,
                    &values,
                    quantity,
                )
                .await
            }
        }
    }

    async fn respond_read(
        &mut self,
        slave: u8,
        function: FunctionCode,
        payload: Result<Vec<u8>, StoreError>,
    ) -> Result<(), ServerError> {
        match payload {
            Ok(payload) => {
                let adu = frame::encode_read_response(slave, function, &payload);
                self.transport.send_frame(&adu).await?;
                Ok(())
            }
            Err(err) => self.respond_store_error(slave, function, err).await,
        }
    }

    async fn write_coils(
        &mut self,
        slave: u8,
        function: FunctionCode,
        start: u16,
        values: &[bool],
        echo_word: u16,
    ) -> Result<(), ServerError> {
        match self.store.apply_external_coil_write(start, values) {
            Ok(()) => {
                let echo = frame::encode_write_echo(slave, function, start, echo_word);
                self.transport.send_frame(&echo).await?;
                let hooks = self.store.coil_write_hooks(start, values.len() as u16);
                run_write_hooks(BankKind::Coil, start, values, hooks);
                Ok(())
            }
            Err(err) => self.respond_store_error(slave, function, err).await,
        }
    }

    async fn write_holdings(
        &mut self,
        slave: u8,
        function: FunctionCode,
        start: u16,
        values: &[u16],
        echo_word: u16,
    ) -> Result<(), ServerError> {
        match self.store.apply_external_holding_write(start, values) {
            Ok(()) => {
                let echo = frame::encode_write_echo(slave, function, start, echo_word);
                self.transport.send_frame(&echo).await?;
                let hooks = self.store.holding_write_hooks(start, values.len() as u16);
                run_write_hooks(BankKind::Holding, start, values, hooks);
                Ok(())
            }
            Err(err) => self.respond_store_error(slave, function, err).await,
        }
    }

    async fn respond_store_error(
        &mut self,
        slave: u8,
        function: FunctionCode,
        err: StoreError,
    ) -> Result<(), ServerError> {
        let code = match &err {
            StoreError::NoSuchAddress { .. } | StoreError::AddressOverflow { .. } => {
                ExceptionCode::IllegalDataAddress
            }
            StoreError::HookFailed { .. } => {
                error!("{err}");
                ExceptionCode::SlaveDeviceFailure
            }
            _ => ExceptionCode::SlaveDeviceFailure,
        };
        self.send_exception(slave, function.as_u8(), code).await
    }

    async fn send_exception(
        &mut self,
        slave: u8,
        function: u8,
        code: ExceptionCode,
    ) -> Result<(), ServerError> {
        let adu = frame::encode_exception(slave, function, code);
        self.transport.send_frame(&adu).await?;
        Ok(())
    }
}

/// Fire write callbacks in ascending address order. The response is already
/// on the wire at this point, so failures can only be logged.
fn run_write_hooks<T: Copy + std::fmt::Debug>(
    kind: BankKind,
    start: u16,
    values: &[T],
    hooks: Vec<(u16, WriteHook<T>)>,
) {
    for (address, hook) in hooks {
        let value = values[(address - start) as usize];
        if let Err(err) = hook(kind, address, value) {
            error!("{kind:?} write callback at {address} failed after commit of {value:?}: {err}");
        }
    }
}
