//! In-memory transport for tests and dry runs.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::transport::ModbusTransport;

/// One call observed by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Read { address: u16, count: u16 },
    Flush,
    Close,
    Open,
    Sleep(Duration),
}

/// Scripted failure injected into the next matching read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Checksum failure.
    Crc,
    /// No response.
    Timeout,
    /// Response with one word missing.
    Truncated,
}

/// A register map held in memory.
///
/// Sleeps are recorded, not waited, so pacing can be asserted without
/// slowing tests down.
#[derive(Debug, Default)]
pub struct MockTransport {
    registers: HashMap<u16, u16>,
    faults: VecDeque<(u16, Fault)>,
    operations: Vec<Operation>,
    open: bool,
}

impl MockTransport {
    /// An open transport with an empty (all zero) register map.
    pub fn new() -> Self {
        Self {
            open: true,
            ..Self::default()
        }
    }

    /// Store `words` starting at `address`.
    pub fn with_registers(mut self, address: u16, words: &[u16]) -> Self {
        self.set_registers(address, words);
        self
    }

    pub fn set_registers(&mut self, address: u16, words: &[u16]) {
        for (offset, word) in words.iter().enumerate() {
            self.registers
                .insert(address.wrapping_add(offset as u16), *word);
        }
    }

    /// Fail the next read covering `address`.
    pub fn fail_at(&mut self, address: u16, fault: Fault) {
        self.faults.push_back((address, fault));
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn clear_operations(&mut self) {
        self.operations.clear();
    }

    /// Addresses and widths of the reads issued so far.
    pub fn reads(&self) -> Vec<(u16, u16)> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                Operation::Read { address, count } => Some((*address, *count)),
                _ => None,
            })
            .collect()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn take_fault(&mut self, address: u16, count: u16) -> Option<Fault> {
        let end = u32::from(address) + u32::from(count);
        let index = self
            .faults
            .iter()
            .position(|(at, _)| (u32::from(address)..end).contains(&u32::from(*at)))?;
        self.faults.remove(index).map(|(_, fault)| fault)
    }
}

#[async_trait]
impl ModbusTransport for MockTransport {
    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.operations.push(Operation::Read { address, count });

        if !self.open {
            return Err(TransportError::NotOpen);
        }

        let words: Vec<u16> = (0..count)
            .map(|offset| {
                self.registers
                    .get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect();

        match self.take_fault(address, count) {
            None => Ok(words),
            Some(Fault::Crc) => Err(TransportError::Protocol("Invalid CRC".to_string())),
            Some(Fault::Timeout) => Err(TransportError::Timeout(Duration::from_secs(1))),
            Some(Fault::Truncated) => Ok(words[..words.len().saturating_sub(1)].to_vec()),
        }
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.operations.push(Operation::Flush);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.operations.push(Operation::Close);
        self.open = false;
        Ok(())
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        self.operations.push(Operation::Open);
        self.open = true;
        Ok(())
    }

    async fn sleep(&mut self, duration: Duration) {
        self.operations.push(Operation::Sleep(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_stored_words() {
        let mut transport = MockTransport::new().with_registers(100, &[1, 2, 3]);

        assert_eq!(transport.read_registers(100, 3).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(transport.read_registers(102, 2).await.unwrap(), vec![3, 0]);
        assert_eq!(transport.reads(), vec![(100, 3), (102, 2)]);
    }

    #[tokio::test]
    async fn test_fault_is_consumed_once() {
        let mut transport = MockTransport::new().with_registers(10, &[7, 8]);
        transport.fail_at(11, Fault::Crc);

        assert!(transport.read_registers(0, 5).await.is_ok());
        assert!(matches!(
            transport.read_registers(10, 2).await,
            Err(TransportError::Protocol(_))
        ));
        assert_eq!(transport.read_registers(10, 2).await.unwrap(), vec![7, 8]);
    }

    #[tokio::test]
    async fn test_truncated_response() {
        let mut transport = MockTransport::new().with_registers(10, &[7, 8]);
        transport.fail_at(10, Fault::Truncated);

        assert_eq!(transport.read_registers(10, 2).await.unwrap(), vec![7]);
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_reads() {
        let mut transport = MockTransport::new();
        transport.close().await.unwrap();
        assert!(matches!(
            transport.read_registers(0, 1).await,
            Err(TransportError::NotOpen)
        ));

        transport.open().await.unwrap();
        assert!(transport.read_registers(0, 1).await.is_ok());
    }
}
