//! Defines the transport mechanisms all socbridge sessions must implement

pub mod etherbone;
pub mod mock;

use crate::core::{
    AccessWidth,
    MAX_TRANSFER_OPS,
};
use thiserror::Error;

pub type TransportResult<T> = Result<T, Error>;

/// Errors surfaced at the memory-access boundary. The argument checks fire
/// before any packet is built or sent and are never retried.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Address {addr:#010x} is not aligned for a {width:?} access")]
    Misaligned { addr: u32, width: AccessWidth },
    #[error("Transfer length {0} is outside 1..=65536")]
    BadLength(usize),
    #[error("Value {value:#x} does not fit in a {width:?} access")]
    ValueTooWide { value: u32, width: AccessWidth },
    #[error("Access at {addr:#010x} runs past the end of the 32-bit address space")]
    AddressWrap { addr: u32, count: usize },
    #[error("Error from the lower-level Etherbone library")]
    Bus(#[from] ::etherbone::Error),
}

/// The trait implemented by remote-bus transport mechanisms. The methods of
/// this trait *assume* the session is already connected.
pub trait Transport {
    /// Read `count` values of `width` starting at `addr`, returned in
    /// ascending address order.
    /// # Errors
    /// Returns an error on bad arguments or transport failure
    fn read(&mut self, addr: u32, width: AccessWidth, count: usize) -> TransportResult<Vec<u32>>;

    /// Write `values` of `width` to ascending addresses starting at `addr`.
    /// Success means the peer acknowledged the packet, not that a readback
    /// was performed.
    /// # Errors
    /// Returns an error on bad arguments or transport failure
    fn write(&mut self, addr: u32, width: AccessWidth, values: &[u32]) -> TransportResult<()>;

    /// Read a single full bus word
    /// # Errors
    /// Returns an error on bad arguments or transport failure
    fn peek(&mut self, addr: u32) -> TransportResult<u32> {
        Ok(self.read(addr, AccessWidth::Word, 1)?[0])
    }

    /// Write a single full bus word
    /// # Errors
    /// Returns an error on bad arguments or transport failure
    fn poke(&mut self, addr: u32, value: u32) -> TransportResult<()> {
        self.write(addr, AccessWidth::Word, &[value])
    }
}

/// Validate the shape of an access before anything touches the network
pub(crate) fn check_access(addr: u32, width: AccessWidth, count: usize) -> TransportResult<()> {
    if !width.is_aligned(addr) {
        return Err(Error::Misaligned { addr, width });
    }
    if count == 0 || count > MAX_TRANSFER_OPS {
        return Err(Error::BadLength(count));
    }
    let span = count as u64 * width.bytes() as u64;
    if u64::from(addr) + span > 1 << 32 {
        return Err(Error::AddressWrap { addr, count });
    }
    Ok(())
}

/// Every value must fit the lanes its width asserts
pub(crate) fn check_values(width: AccessWidth, values: &[u32]) -> TransportResult<()> {
    for &value in values {
        if value > width.max_value() {
            return Err(Error::ValueTooWide { value, width });
        }
    }
    Ok(())
}
