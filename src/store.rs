//! Four typed register banks with per-cell callbacks and a change log.
//!
//! Banks are sparse: a cell exists only where it was explicitly added, and a
//! wire access touching any absent address in its range is refused whole.
//! Coils and holding registers additionally keep a change log of externally
//! driven writes, keyed by address and stamped with a monotonic counter so
//! the embedder can drain them without losing a concurrent overwrite.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

/// The four Modbus bank kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BankKind {
    /// Read/write bits (function codes 0x01, 0x05, 0x0F).
    Coil,
    /// Read-only bits (function code 0x02).
    DiscreteInput,
    /// Read/write 16-bit words (function codes 0x03, 0x06, 0x10).
    Holding,
    /// Read-only 16-bit words (function code 0x04).
    Input,
}

impl BankKind {
    /// Banks a remote master may write to.
    pub fn externally_writable(self) -> bool {
        matches!(self, BankKind::Coil | BankKind::Holding)
    }
}

/// Error type surfaced by failing cell callbacks.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Invoked before a cell is sampled for a read response; may rewrite the
/// value, and the sample is taken after it returns.
pub type ReadHook<T> = Arc<dyn Fn(BankKind, u16, &mut T) -> Result<(), HookError> + Send + Sync>;

/// Invoked with the committed value after an external write, once the
/// response has been handed to the transport.
pub type WriteHook<T> = Arc<dyn Fn(BankKind, u16, T) -> Result<(), HookError> + Send + Sync>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no {kind:?} cell at address {address}")]
    NoSuchAddress { kind: BankKind, address: u16 },

    #[error("{kind:?} range {start}+{len} leaves the 16-bit address space")]
    AddressOverflow { kind: BankKind, start: u16, len: usize },

    #[error("{0:?} cells cannot be changed externally")]
    NotWritable(BankKind),

    #[error("{kind:?} setup block at {address} has neither values nor a usable length")]
    InvalidSetup { kind: BankKind, address: u16 },

    #[error("{kind:?} callback at address {address} failed: {source}")]
    HookFailed {
        kind: BankKind,
        address: u16,
        source: HookError,
    },
}

/// One externally driven write, as recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change<T> {
    pub value: T,
    /// Monotonic change-counter tick, not wall time.
    pub timestamp: u64,
}

struct Cell<T> {
    value: T,
    on_read: Option<ReadHook<T>>,
    on_write: Option<WriteHook<T>>,
}

impl<T> Cell<T> {
    fn new(value: T) -> Self {
        Cell {
            value,
            on_read: None,
            on_write: None,
        }
    }
}

/// Overwrite a cell's value in place. Hook fields are never touched here, so
/// value updates cannot strip callbacks.
fn update_value<T>(cell: &mut Cell<T>, value: T) {
    cell.value = value;
}

/// One sparse bank.
struct Bank<T: Copy> {
    kind: BankKind,
    cells: BTreeMap<u16, Cell<T>>,
}

impl<T: Copy> Bank<T> {
    fn new(kind: BankKind) -> Self {
        Bank {
            kind,
            cells: BTreeMap::new(),
        }
    }

    fn check_range(&self, start: u16, len: usize) -> Result<(), StoreError> {
        if len > 0 && start as usize + len - 1 > u16::MAX as usize {
            return Err(StoreError::AddressOverflow {
                kind: self.kind,
                start,
                len,
            });
        }
        Ok(())
    }

    /// Every address of `[start, start+len)` must hold a live cell.
    fn require_range(&self, start: u16, len: usize) -> Result<(), StoreError> {
        self.check_range(start, len)?;
        for offset in 0..len {
            let address = start + offset as u16;
            if !self.cells.contains_key(&address) {
                return Err(StoreError::NoSuchAddress {
                    kind: self.kind,
                    address,
                });
            }
        }
        Ok(())
    }

    fn add(
        &mut self,
        start: u16,
        values: &[T],
        on_read: Option<ReadHook<T>>,
        on_write: Option<WriteHook<T>>,
    ) -> Result<(), StoreError> {
        self.check_range(start, values.len())?;
        for (offset, &value) in values.iter().enumerate() {
            let cell = self
                .cells
                .entry(start + offset as u16)
                .or_insert_with(|| Cell::new(value));
            cell.value = value;
            // a supplied hook replaces the existing one, an omitted hook is kept
            if let Some(hook) = &on_read {
                cell.on_read = Some(Arc::clone(hook));
            }
            if let Some(hook) = &on_write {
                cell.on_write = Some(Arc::clone(hook));
            }
        }
        Ok(())
    }

    fn set(&mut self, start: u16, values: &[T]) -> Result<(), StoreError> {
        self.check_range(start, values.len())?;
        for (offset, &value) in values.iter().enumerate() {
            let address = start + offset as u16;
            match self.cells.get_mut(&address) {
                Some(cell) => update_value(cell, value),
                None => {
                    self.cells.insert(address, Cell::new(value));
                }
            }
        }
        Ok(())
    }

    fn remove(&mut self, address: u16) -> Option<T> {
        self.cells.remove(&address).map(|cell| cell.value)
    }

    fn get(&self, address: u16) -> Result<T, StoreError> {
        self.cells
            .get(&address)
            .map(|cell| cell.value)
            .ok_or(StoreError::NoSuchAddress {
                kind: self.kind,
                address,
            })
    }

    fn addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.cells.keys().copied()
    }

    /// Wire read: run read hooks per cell in ascending order, sampling each
    /// cell after its hook returns.
    fn read_for_wire(&mut self, start: u16, quantity: u16) -> Result<Vec<T>, StoreError> {
        self.require_range(start, quantity as usize)?;
        let mut out = Vec::with_capacity(quantity as usize);
        for offset in 0..quantity {
            let address = start + offset;
            let Some(cell) = self.cells.get_mut(&address) else {
                return Err(StoreError::NoSuchAddress {
                    kind: self.kind,
                    address,
                });
            };
            if let Some(hook) = cell.on_read.clone() {
                hook(self.kind, address, &mut cell.value).map_err(|source| {
                    StoreError::HookFailed {
                        kind: self.kind,
                        address,
                        source,
                    }
                })?;
            }
            out.push(cell.value);
        }
        Ok(out)
    }

    /// Wire write: commit `values` in ascending order. The whole range is
    /// checked first, so a refused write touches nothing.
    fn apply_external_write(&mut self, start: u16, values: &[T]) -> Result<(), StoreError> {
        self.require_range(start, values.len())?;
        for (offset, &value) in values.iter().enumerate() {
            if let Some(cell) = self.cells.get_mut(&(start + offset as u16)) {
                update_value(cell, value);
            }
        }
        Ok(())
    }

    /// Write hooks attached within `[start, start+quantity)`, ascending.
    fn write_hooks(&self, start: u16, quantity: u16) -> Vec<(u16, WriteHook<T>)> {
        (0..quantity)
            .filter_map(|offset| {
                let address = start + offset;
                self.cells
                    .get(&address)
                    .and_then(|cell| cell.on_write.clone())
                    .map(|hook| (address, hook))
            })
            .collect()
    }
}

/// The slave's register model: four banks plus the change log.
///
/// Owned exclusively by one server instance; embedder access happens between
/// `process_one` calls.
pub struct RegisterStore {
    coils: Bank<bool>,
    discrete_inputs: Bank<bool>,
    holding_registers: Bank<u16>,
    input_registers: Bank<u16>,
    changed_coils: BTreeMap<u16, Change<bool>>,
    changed_holdings: BTreeMap<u16, Change<u16>>,
    change_clock: u64,
}

impl Default for RegisterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterStore {
    pub fn new() -> Self {
        Self {
            coils: Bank::new(BankKind::Coil),
            discrete_inputs: Bank::new(BankKind::DiscreteInput),
            holding_registers: Bank::new(BankKind::Holding),
            input_registers: Bank::new(BankKind::Input),
            changed_coils: BTreeMap::new(),
            changed_holdings: BTreeMap::new(),
            change_clock: 0,
        }
    }

    // ========== Coils (function codes 0x01, 0x05, 0x0F) ==========

    pub fn add_coil(&mut self, address: u16, value: bool) -> Result<(), StoreError> {
        self.coils.add(address, &[value], None, None)
    }

    pub fn add_coils(&mut self, address: u16, values: &[bool]) -> Result<(), StoreError> {
        self.coils.add(address, values, None, None)
    }

    /// Like [`add_coils`](Self::add_coils), attaching callbacks to every cell
    /// of the run. On pre-existing cells a supplied hook replaces the old
    /// one; an omitted hook leaves the old one in place.
    pub fn add_coils_with_hooks(
        &mut self,
        address: u16,
        values: &[bool],
        on_read: Option<ReadHook<bool>>,
        on_write: Option<WriteHook<bool>>,
    ) -> Result<(), StoreError> {
        self.coils.add(address, values, on_read, on_write)
    }

    /// Remove the cell, returning its prior value if it existed.
    pub fn remove_coil(&mut self, address: u16) -> Option<bool> {
        self.coils.remove(address)
    }

    pub fn set_coil(&mut self, address: u16, value: bool) -> Result<(), StoreError> {
        self.coils.set(address, &[value])
    }

    pub fn set_coils(&mut self, address: u16, values: &[bool]) -> Result<(), StoreError> {
        self.coils.set(address, values)
    }

    pub fn get_coil(&self, address: u16) -> Result<bool, StoreError> {
        self.coils.get(address)
    }

    pub fn coil_addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.coils.addresses()
    }

    // ========== Discrete inputs (function code 0x02) ==========

    pub fn add_discrete_input(&mut self, address: u16, value: bool) -> Result<(), StoreError> {
        self.discrete_inputs.add(address, &[value], None, None)
    }

    pub fn add_discrete_inputs(&mut self, address: u16, values: &[bool]) -> Result<(), StoreError> {
        self.discrete_inputs.add(address, values, None, None)
    }

    /// Discrete inputs are read-only over the wire, so only a read hook can
    /// be attached.
    pub fn add_discrete_inputs_with_hooks(
        &mut self,
        address: u16,
        values: &[bool],
        on_read: Option<ReadHook<bool>>,
    ) -> Result<(), StoreError> {
        self.discrete_inputs.add(address, values, on_read, None)
    }

    pub fn remove_discrete_input(&mut self, address: u16) -> Option<bool> {
        self.discrete_inputs.remove(address)
    }

    pub fn set_discrete_input(&mut self, address: u16, value: bool) -> Result<(), StoreError> {
        self.discrete_inputs.set(address, &[value])
    }

    pub fn set_discrete_inputs(&mut self, address: u16, values: &[bool]) -> Result<(), StoreError> {
        self.discrete_inputs.set(address, values)
    }

    pub fn get_discrete_input(&self, address: u16) -> Result<bool, StoreError> {
        self.discrete_inputs.get(address)
    }

    pub fn discrete_input_addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.discrete_inputs.addresses()
    }

    // ========== Holding registers (function codes 0x03, 0x06, 0x10) ==========

    pub fn add_holding_register(&mut self, address: u16, value: u16) -> Result<(), StoreError> {
        self.holding_registers.add(address, &[value], None, None)
    }

    pub fn add_holding_registers(&mut self, address: u16, values: &[u16]) -> Result<(), StoreError> {
        self.holding_registers.add(address, values, None, None)
    }

    pub fn add_holding_registers_with_hooks(
        &mut self,
        address: u16,
        values: &[u16],
        on_read: Option<ReadHook<u16>>,
        on_write: Option<WriteHook<u16>>,
    ) -> Result<(), StoreError> {
        self.holding_registers.add(address, values, on_read, on_write)
    }

    pub fn remove_holding_register(&mut self, address: u16) -> Option<u16> {
        self.holding_registers.remove(address)
    }

    pub fn set_holding_register(&mut self, address: u16, value: u16) -> Result<(), StoreError> {
        self.holding_registers.set(address, &[value])
    }

    pub fn set_holding_registers(&mut self, address: u16, values: &[u16]) -> Result<(), StoreError> {
        self.holding_registers.set(address, values)
    }

    pub fn get_holding_register(&self, address: u16) -> Result<u16, StoreError> {
        self.holding_registers.get(address)
    }

    pub fn holding_register_addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.holding_registers.addresses()
    }

    // ========== Input registers (function code 0x04) ==========

    pub fn add_input_register(&mut self, address: u16, value: u16) -> Result<(), StoreError> {
        self.input_registers.add(address, &[value], None, None)
    }

    pub fn add_input_registers(&mut self, address: u16, values: &[u16]) -> Result<(), StoreError> {
        self.input_registers.add(address, values, None, None)
    }

    /// Input registers are read-only over the wire, so only a read hook can
    /// be attached.
    pub fn add_input_registers_with_hooks(
        &mut self,
        address: u16,
        values: &[u16],
        on_read: Option<ReadHook<u16>>,
    ) -> Result<(), StoreError> {
        self.input_registers.add(address, values, on_read, None)
    }

    pub fn remove_input_register(&mut self, address: u16) -> Option<u16> {
        self.input_registers.remove(address)
    }

    pub fn set_input_register(&mut self, address: u16, value: u16) -> Result<(), StoreError> {
        self.input_registers.set(address, &[value])
    }

    pub fn set_input_registers(&mut self, address: u16, values: &[u16]) -> Result<(), StoreError> {
        self.input_registers.set(address, values)
    }

    pub fn get_input_register(&self, address: u16) -> Result<u16, StoreError> {
        self.input_registers.get(address)
    }

    pub fn input_register_addresses(&self) -> impl Iterator<Item = u16> + '_ {
        self.input_registers.addresses()
    }

    // ========== Wire access (dispatcher only) ==========

    pub(crate) fn read_coils_for_wire(
        &mut self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, StoreError> {
        self.coils.read_for_wire(start, quantity)
    }

    pub(crate) fn read_discrete_inputs_for_wire(
        &mut self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, StoreError> {
        self.discrete_inputs.read_for_wire(start, quantity)
    }

    pub(crate) fn read_holding_registers_for_wire(
        &mut self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, StoreError> {
        self.holding_registers.read_for_wire(start, quantity)
    }

    pub(crate) fn read_input_registers_for_wire(
        &mut self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, StoreError> {
        self.input_registers.read_for_wire(start, quantity)
    }

    pub(crate) fn apply_external_coil_write(
        &mut self,
        start: u16,
        values: &[bool],
    ) -> Result<(), StoreError> {
        self.coils.apply_external_write(start, values)?;
        let timestamp = self.tick();
        for (offset, &value) in values.iter().enumerate() {
            self.changed_coils
                .insert(start + offset as u16, Change { value, timestamp });
        }
        Ok(())
    }

    pub(crate) fn apply_external_holding_write(
        &mut self,
        start: u16,
        values: &[u16],
    ) -> Result<(), StoreError> {
        self.holding_registers.apply_external_write(start, values)?;
        let timestamp = self.tick();
        for (offset, &value) in values.iter().enumerate() {
            self.changed_holdings
                .insert(start + offset as u16, Change { value, timestamp });
        }
        Ok(())
    }

    pub(crate) fn coil_write_hooks(&self, start: u16, quantity: u16) -> Vec<(u16, WriteHook<bool>)> {
        self.coils.write_hooks(start, quantity)
    }

    pub(crate) fn holding_write_hooks(&self, start: u16, quantity: u16) -> Vec<(u16, WriteHook<u16>)> {
        self.holding_registers.write_hooks(start, quantity)
    }

    // ========== Change log ==========

    /// Coil writes driven by a remote master since their last acknowledgement.
    pub fn changed_coils(&self) -> &BTreeMap<u16, Change<bool>> {
        &self.changed_coils
    }

    /// Holding-register writes driven by a remote master since their last
    /// acknowledgement.
    pub fn changed_holding_registers(&self) -> &BTreeMap<u16, Change<u16>> {
        &self.changed_holdings
    }

    /// Remove a change-log entry, but only if `timestamp` still matches the
    /// stored one. Returns whether the entry was removed; a mismatch means a
    /// newer write landed in between and the entry is kept for the next
    /// drain.
    pub fn acknowledge_change(
        &mut self,
        kind: BankKind,
        address: u16,
        timestamp: u64,
    ) -> Result<bool, StoreError> {
        match kind {
            BankKind::Coil => Ok(acknowledge(&mut self.changed_coils, address, timestamp)),
            BankKind::Holding => Ok(acknowledge(&mut self.changed_holdings, address, timestamp)),
            other => Err(StoreError::NotWritable(other)),
        }
    }

    fn tick(&mut self) -> u64 {
        self.change_clock += 1;
        self.change_clock
    }
}

fn acknowledge<T>(log: &mut BTreeMap<u16, Change<T>>, address: u16, timestamp: u64) -> bool {
    match log.get(&address) {
        Some(change) if change.timestamp == timestamp => {
            log.remove(&address);
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_only_coils_and_holdings_are_externally_writable() {
        assert!(BankKind::Coil.externally_writable());
        assert!(BankKind::Holding.externally_writable());
        assert!(!BankKind::DiscreteInput.externally_writable());
        assert!(!BankKind::Input.externally_writable());
    }

    #[test]
    fn test_get_requires_explicit_add() {
        let mut store = RegisterStore::new();
        assert!(matches!(
            store.get_coil(0),
            Err(StoreError::NoSuchAddress { .. })
        ));

        store.add_coil(0, true).unwrap();
        assert!(store.get_coil(0).unwrap());
    }

    #[test]
    fn test_sequence_add_expands_per_cell() {
        let mut store = RegisterStore::new();
        store.add_holding_registers(10, &[100, 200, 300]).unwrap();

        assert_eq!(store.get_holding_register(10).unwrap(), 100);
        assert_eq!(store.get_holding_register(11).unwrap(), 200);
        assert_eq!(store.get_holding_register(12).unwrap(), 300);
        assert!(store.get_holding_register(13).is_err());
    }

    #[test]
    fn test_set_creates_cells_and_preserves_hooks() {
        let mut store = RegisterStore::new();
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        store
            .add_holding_registers_with_hooks(
                0,
                &[5],
                Some(Arc::new(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
                None,
            )
            .unwrap();

        // value-only set must not strip the hook
        store.set_holding_register(0, 6).unwrap();
        store.set_holding_registers(1, &[7, 8]).unwrap();

        assert_eq!(store.read_holding_registers_for_wire(0, 3).unwrap(), vec![6, 7, 8]);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_add_replaces_only_supplied_hooks() {
        let mut store = RegisterStore::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        store
            .add_coils_with_hooks(
                0,
                &[false],
                Some(Arc::new(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
                None,
            )
            .unwrap();

        // re-add without hooks keeps the first read hook
        store.add_coil(0, true).unwrap();
        store.read_coils_for_wire(0, 1).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);

        // re-add with a new hook replaces it
        let counter = Arc::clone(&second);
        store
            .add_coils_with_hooks(
                0,
                &[true],
                Some(Arc::new(move |_, _, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
                None,
            )
            .unwrap();
        store.read_coils_for_wire(0, 1).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_returns_prior_value() {
        let mut store = RegisterStore::new();
        store.add_input_register(4, 77).unwrap();

        assert_eq!(store.remove_input_register(4), Some(77));
        assert_eq!(store.remove_input_register(4), None);
    }

    #[test]
    fn test_addresses_iteration() {
        let mut store = RegisterStore::new();
        store.add_coil(9, false).unwrap();
        store.add_coils(2, &[true, true]).unwrap();

        let addresses: Vec<u16> = store.coil_addresses().collect();
        assert_eq!(addresses, vec![2, 3, 9]);
    }

    #[test]
    fn test_range_overflow_is_rejected_whole() {
        let mut store = RegisterStore::new();
        let result = store.add_holding_registers(u16::MAX, &[1, 2]);
        assert!(matches!(result, Err(StoreError::AddressOverflow { .. })));
        assert!(store.get_holding_register(u16::MAX).is_err());
    }

    #[test]
    fn test_wire_read_requires_full_range() {
        let mut store = RegisterStore::new();
        store.add_holding_registers(0, &[0; 10]).unwrap();

        let result = store.read_holding_registers_for_wire(9, 2);
        assert!(matches!(
            result,
            Err(StoreError::NoSuchAddress { address: 10, .. })
        ));
    }

    #[test]
    fn test_wire_read_samples_after_hook() {
        let mut store = RegisterStore::new();
        store
            .add_input_registers_with_hooks(
                0,
                &[0],
                Some(Arc::new(|_, _, value| {
                    *value = 42;
                    Ok(())
                })),
            )
            .unwrap();

        assert_eq!(store.read_input_registers_for_wire(0, 1).unwrap(), vec![42]);
        // the refreshed value sticks
        assert_eq!(store.get_input_register(0).unwrap(), 42);
    }

    #[test]
    fn test_failed_read_hook_surfaces() {
        let mut store = RegisterStore::new();
        store
            .add_input_registers_with_hooks(
                0,
                &[0],
                Some(Arc::new(|_, _, _| Err("sensor offline".into()))),
            )
            .unwrap();

        assert!(matches!(
            store.read_input_registers_for_wire(0, 1),
            Err(StoreError::HookFailed { address: 0, .. })
        ));
    }

    #[test]
    fn test_external_write_is_atomic() {
        let mut store = RegisterStore::new();
        store.add_holding_registers(0, &[1, 2]).unwrap();

        let result = store.apply_external_holding_write(0, &[9, 9, 9]);
        assert!(matches!(result, Err(StoreError::NoSuchAddress { .. })));
        assert_eq!(store.get_holding_register(0).unwrap(), 1);
        assert_eq!(store.get_holding_register(1).unwrap(), 2);
        assert!(store.changed_holding_registers().is_empty());
    }

    #[test]
    fn test_external_write_records_changes() {
        let mut store = RegisterStore::new();
        store.add_coils(0, &[false; 3]).unwrap();

        store.apply_external_coil_write(0, &[true, false, true]).unwrap();

        let log = store.changed_coils();
        assert_eq!(log.len(), 3);
        let tick = log[&0].timestamp;
        assert!(tick > 0);
        // one transaction, one tick
        assert!(log.values().all(|change| change.timestamp == tick));
        assert!(log[&0].value);
        assert!(!log[&1].value);
    }

    #[test]
    fn test_embedder_set_does_not_log_changes() {
        let mut store = RegisterStore::new();
        store.add_coil(0, false).unwrap();
        store.set_coil(0, true).unwrap();
        store.add_holding_register(0, 0).unwrap();
        store.set_holding_register(0, 5).unwrap();

        assert!(store.changed_coils().is_empty());
        assert!(store.changed_holding_registers().is_empty());
    }

    #[test]
    fn test_acknowledge_is_timestamp_guarded() {
        let mut store = RegisterStore::new();
        store.add_coil(3, false).unwrap();
        store.apply_external_coil_write(3, &[true]).unwrap();
        let stale = store.changed_coils()[&3].timestamp;

        // a second write bumps the timestamp; the stale one no longer matches
        store.apply_external_coil_write(3, &[false]).unwrap();
        assert!(!store.acknowledge_change(BankKind::Coil, 3, stale).unwrap());
        assert!(store.changed_coils().contains_key(&3));

        let fresh = store.changed_coils()[&3].timestamp;
        assert!(store.acknowledge_change(BankKind::Coil, 3, fresh).unwrap());
        assert!(!store.changed_coils().contains_key(&3));

        // absent entries acknowledge as false
        assert!(!store.acknowledge_change(BankKind::Coil, 3, fresh).unwrap());
    }

    #[test]
    fn test_acknowledge_rejects_read_only_banks() {
        let mut store = RegisterStore::new();
        assert!(matches!(
            store.acknowledge_change(BankKind::Input, 0, 1),
            Err(StoreError::NotWritable(BankKind::Input))
        ));
    }

    #[test]
    fn test_write_hooks_collected_in_ascending_order() {
        let mut store = RegisterStore::new();
        let noop: WriteHook<bool> = Arc::new(|_, _, _| Ok(()));
        store
            .add_coils_with_hooks(5, &[false], None, Some(Arc::clone(&noop)))
            .unwrap();
        store.add_coil(6, false).unwrap();
        store
            .add_coils_with_hooks(7, &[false], None, Some(noop))
            .unwrap();

        let hooks = store.coil_write_hooks(5, 3);
        let addresses: Vec<u16> = hooks.iter().map(|(address, _)| *address).collect();
        assert_eq!(addresses, vec![5, 7]);
    }
}
