//! Mock transport implementation used in testing the interface

use super::{
    check_access,
    check_values,
    Transport,
    TransportResult,
};
use crate::core::AccessWidth;
use std::collections::HashMap;

/// A transport that reads and writes process-local memory, useful for
/// exercising callers without a device on the bench. Memory is a sparse
/// byte map; bytes never written read back as zero.
#[derive(Debug, Default)]
pub struct Mock {
    memory: HashMap<u32, u8>,
}

impl Mock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for Mock {
    fn read(&mut self, addr: u32, width: AccessWidth, count: usize) -> TransportResult<Vec<u32>> {
        check_access(addr, width, count)?;
        let step = width.bytes() as u32;
        Ok((0..count as u32)
            .map(|i| {
                let beat = addr + i * step;
                // Bytes assemble big-endian, matching the bus lane order
                (0..step).fold(0u32, |acc, b| {
                    acc << 8 | u32::from(self.memory.get(&(beat + b)).copied().unwrap_or(0))
                })
            })
            .collect())
    }

    fn write(&mut self, addr: u32, width: AccessWidth, values: &[u32]) -> TransportResult<()> {
        check_access(addr, width, values.len())?;
        check_values(width, values)?;
        let step = width.bytes() as u32;
        for (i, &value) in values.iter().enumerate() {
            let beat = addr + i as u32 * step;
            for b in 0..step {
                let shift = 8 * (step - 1 - b);
                self.memory.insert(beat + b, (value >> shift) as u8);
            }
        }
        Ok(())
    }
}
