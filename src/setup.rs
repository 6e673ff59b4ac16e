//! Declarative bank setup descriptions.
//!
//! A [`StoreSetup`] describes initial bank contents as data: addresses and
//! either explicit values or a default-filled length. The value/length part
//! round-trips through serde (the demo binary loads it from JSON); hooks are
//! code and can only be attached programmatically, so they are skipped on
//! (de)serialization.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::{BankKind, ReadHook, RegisterStore, StoreError, WriteHook};

/// Initial contents for one run of bit cells.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BitBlock {
    pub address: u16,
    /// Explicit initial values, one cell per element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<bool>>,
    /// Number of cells to fill with `false` under `use_defaults`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u16>,
    #[serde(skip)]
    pub on_read: Option<ReadHook<bool>>,
    #[serde(skip)]
    pub on_write: Option<WriteHook<bool>>,
}

/// Initial contents for one run of 16-bit register cells.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct WordBlock {
    pub address: u16,
    /// Explicit initial values, one cell per element.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<u16>>,
    /// Number of cells to fill with `0` under `use_defaults`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub len: Option<u16>,
    #[serde(skip)]
    pub on_read: Option<ReadHook<u16>>,
    #[serde(skip)]
    pub on_write: Option<WriteHook<u16>>,
}

impl fmt::Debug for BitBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitBlock")
            .field("address", &self.address)
            .field("values", &self.values)
            .field("len", &self.len)
            .field("on_read", &self.on_read.is_some())
            .field("on_write", &self.on_write.is_some())
            .finish()
    }
}

impl fmt::Debug for WordBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WordBlock")
            .field("address", &self.address)
            .field("values", &self.values)
            .field("len", &self.len)
            .field("on_read", &self.on_read.is_some())
            .field("on_write", &self.on_write.is_some())
            .finish()
    }
}

/// Declarative description of all four banks.
///
/// Write hooks on the read-only banks (`discrete_inputs`,
/// `input_registers`) are ignored, those cells cannot be written over the
/// wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSetup {
    pub coils: Vec<BitBlock>,
    pub discrete_inputs: Vec<BitBlock>,
    pub holding_registers: Vec<WordBlock>,
    pub input_registers: Vec<WordBlock>,
}

impl StoreSetup {
    /// Expand the description into per-bank adds, in presentation order;
    /// later blocks at the same address overwrite earlier ones.
    ///
    /// With `use_defaults`, every block contributes `len` default-valued
    /// cells (one cell if `len` is absent) instead of its listed values.
    pub fn apply(&self, store: &mut RegisterStore, use_defaults: bool) -> Result<(), StoreError> {
        for block in &self.coils {
            let values = resolve(BankKind::Coil, block.address, &block.values, block.len, use_defaults, false)?;
            store.add_coils_with_hooks(
                block.address,
                &values,
                block.on_read.clone(),
                block.on_write.clone(),
            )?;
        }
        for block in &self.discrete_inputs {
            let values = resolve(
                BankKind::DiscreteInput,
                block.address,
                &block.values,
                block.len,
                use_defaults,
                false,
            )?;
            store.add_discrete_inputs_with_hooks(block.address, &values, block.on_read.clone())?;
        }
        for block in &self.holding_registers {
            let values = resolve(
                BankKind::Holding,
                block.address,
                &block.values,
                block.len,
                use_defaults,
                0,
            )?;
            store.add_holding_registers_with_hooks(
                block.address,
                &values,
                block.on_read.clone(),
                block.on_write.clone(),
            )?;
        }
        for block in &self.input_registers {
            let values = resolve(
                BankKind::Input,
                block.address,
                &block.values,
                block.len,
                use_defaults,
                0,
            )?;
            store.add_input_registers_with_hooks(block.address, &values, block.on_read.clone())?;
        }
        Ok(())
    }
}

fn resolve<T: Copy>(
    kind: BankKind,
    address: u16,
    values: &Option<Vec<T>>,
    len: Option<u16>,
    use_defaults: bool,
    default: T,
) -> Result<Vec<T>, StoreError> {
    if use_defaults {
        let count = len.map_or(1, |n| n as usize);
        return Ok(vec![default; count]);
    }
    match values {
        Some(values) if !values.is_empty() => Ok(values.clone()),
        _ => Err(StoreError::InvalidSetup { kind, address }),
    }
}
