//! Resolves archive executables and transfers control to them.
//!
//! The first four payload bytes of an executable hold its entry address,
//! little-endian. The address must fall inside the configured execution
//! window; archive content is untrusted, so nothing outside that window is
//! ever entered. Once entered, foreign code runs to completion on the
//! caller's stack.

use core::fmt;

use crate::api::{CapabilityTable, API_VERSION};
use crate::archive::Archive;
use crate::hal::AddressWindow;
use crate::preferences::Preferences;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    NotFound,
    /// Missing the executable bit, or hidden by exam mode.
    NotExecutable,
    /// Payload too short for an entry word, or entry outside the window.
    InvalidEntryPoint,
    /// Another foreign call is already being served.
    Busy,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::NotFound => f.write_str("no such executable"),
            ExecError::NotExecutable => f.write_str("entry is not executable"),
            ExecError::InvalidEntryPoint => f.write_str("entry point outside execution window"),
            ExecError::Busy => f.write_str("foreign code already running"),
        }
    }
}

impl ufmt::uDebug for ExecError {
    fn fmt<W: ufmt::uWrite + ?Sized>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error> {
        f.write_str(match self {
            ExecError::NotFound => "NotFound",
            ExecError::NotExecutable => "NotExecutable",
            ExecError::InvalidEntryPoint => "InvalidEntryPoint",
            ExecError::Busy => "Busy",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Resolving,
    Executing,
    Rejected(ExecError),
    Returned(u32),
}

/// Arguments of one entry-point call.
pub struct EntryCall<'h> {
    pub address: u32,
    pub api_version: u32,
    pub table: &'h CapabilityTable,
    pub heap: &'h mut [u8],
}

/// Transfers control to a validated entry address.
pub trait EntryInvoker {
    fn invoke(&mut self, call: EntryCall<'_>) -> u32;
}

impl<I: EntryInvoker + ?Sized> EntryInvoker for &mut I {
    fn invoke(&mut self, call: EntryCall<'_>) -> u32 {
        (**self).invoke(call)
    }
}

pub struct Loader<'t> {
    table: &'t CapabilityTable,
    window: AddressWindow,
    state: ExecState,
}

impl<'t> Loader<'t> {
    pub fn new(table: &'t CapabilityTable, window: AddressWindow) -> Self {
        Self {
            table,
            window,
            state: ExecState::Idle,
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    pub fn window(&self) -> AddressWindow {
        self.window
    }

    /// Finds `name` and returns its validated entry address.
    pub fn resolve(
        &mut self,
        archive: &Archive<'_>,
        prefs: Preferences,
        name: &str,
    ) -> Result<u32, ExecError> {
        self.state = ExecState::Resolving;
        let resolved = self.entry_address(archive, prefs, name);
        if let Err(err) = resolved {
            log::warn!("loader: {} rejected: {}", name, err);
            self.state = ExecState::Rejected(err);
        }
        resolved
    }

    fn entry_address(
        &self,
        archive: &Archive<'_>,
        prefs: Preferences,
        name: &str,
    ) -> Result<u32, ExecError> {
        let entry = archive
            .entries(prefs)
            .map_while(Result::ok)
            .find(|e| e.name() == name.as_bytes())
            .ok_or(ExecError::NotFound)?;
        if !entry.is_executable() || !entry.is_readable() {
            return Err(ExecError::NotExecutable);
        }
        let word = match entry.data() {
            [a, b, c, d, ..] => u32::from_le_bytes([*a, *b, *c, *d]),
            _ => return Err(ExecError::InvalidEntryPoint),
        };
        if !self.window.contains(word) {
            return Err(ExecError::InvalidEntryPoint);
        }
        Ok(word)
    }

    /// Resolves `name` and runs it with `heap`, returning its status code.
    /// Nothing is invoked unless resolution succeeds.
    pub fn execute<I: EntryInvoker>(
        &mut self,
        archive: &Archive<'_>,
        prefs: Preferences,
        name: &str,
        heap: &mut [u8],
        invoker: &mut I,
    ) -> Result<u32, ExecError> {
        let address = self.resolve(archive, prefs, name)?;
        log::info!("loader: entering {} at {:#010x}", name, address);

        self.state = ExecState::Executing;
        let status = invoker.invoke(EntryCall {
            address,
            api_version: API_VERSION,
            table: self.table,
            heap,
        });
        log::info!("loader: {} returned {}", name, status);
        self.state = ExecState::Returned(status);
        Ok(status)
    }
}
