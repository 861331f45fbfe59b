//! Poll state machine.
//!
//! A poll walks `Idle -> Reading -> Complete` on success. Any transport
//! failure moves it to `Recovering`: the session is flushed, closed and
//! reopened, the poller waits out a cooldown and the whole poll yields no
//! data. The next poll starts again from `Idle`.

use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, trace, warn};

use crate::error::TransportError;
use crate::register::{Reading, RegisterSet, Value};
use crate::transport::ModbusTransport;

/// Timing parameters of the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Wait after each read of a scattered poll.
    pub pace_delay: Duration,
    /// Wait after the transport has been reopened.
    pub recovery_cooldown: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            pace_delay: Duration::from_secs(1),
            recovery_cooldown: Duration::from_secs(2),
        }
    }
}

/// Where the poller stands in the current poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollState {
    #[default]
    Idle,
    Reading,
    Complete,
    Recovering,
}

/// Sticky communication status of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommunicationState {
    pub last_poll_failed: bool,
}

/// How the registers of a set are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStrategy {
    /// One request spanning the whole (contiguous) set.
    Bulk,
    /// One request per register, paced.
    Scattered,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollOutcome<R> {
    Complete {
        reading: R,
        /// The previous poll had failed.
        recovered: bool,
    },
    Failed,
}

impl<R> PollOutcome<R> {
    pub fn into_reading(self) -> Option<R> {
        match self {
            PollOutcome::Complete { reading, .. } => Some(reading),
            PollOutcome::Failed => None,
        }
    }
}

/// Reads register sets from a transport.
#[derive(Debug, Default)]
pub struct Poller {
    config: PollerConfig,
    state: PollState,
    communication: CommunicationState,
}

impl Poller {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            state: PollState::Idle,
            communication: CommunicationState::default(),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn communication_state(&self) -> CommunicationState {
        self.communication
    }

    /// Read and decode every register of `R`.
    pub async fn poll<R, T>(&mut self, transport: &mut T, strategy: ReadStrategy) -> PollOutcome<R>
    where
        R: Reading,
        T: ModbusTransport + ?Sized,
    {
        if self.state != PollState::Idle {
            self.transition(PollState::Idle);
        }
        self.transition(PollState::Reading);

        let raw = match self.read_raw(transport, R::REGISTERS, strategy).await {
            Ok(raw) => raw,
            Err(e) => {
                self.recover(transport, &e).await;
                return PollOutcome::Failed;
            }
        };

        let values: Vec<Value> = R::REGISTERS
            .iter()
            .zip(&raw)
            .map(|(register, bytes)| {
                let value = register.descriptor.decode(bytes);
                debug!(
                    "... {} addr={} raw={} value={}",
                    register.label,
                    register.descriptor.address,
                    hex(bytes),
                    value
                );
                value
            })
            .collect();

        let Some(reading) = R::assemble(&values) else {
            error!(
                "decoded {} values for {} registers",
                values.len(),
                R::REGISTERS.len()
            );
            self.transition(PollState::Idle);
            return PollOutcome::Failed;
        };

        debug!("==> {:?}", reading);
        let recovered = std::mem::take(&mut self.communication.last_poll_failed);
        self.transition(PollState::Complete);
        PollOutcome::Complete { reading, recovered }
    }

    /// Raw bytes of each register, in set order.
    async fn read_raw<T>(
        &mut self,
        transport: &mut T,
        registers: RegisterSet,
        strategy: ReadStrategy,
    ) -> Result<Vec<Vec<u8>>, TransportError>
    where
        T: ModbusTransport + ?Sized,
    {
        match strategy {
            ReadStrategy::Bulk => match registers.contiguous_span() {
                Some((address, count)) => read_bulk(transport, registers, address, count).await,
                None => {
                    warn!("register set is not contiguous, falling back to scattered reads");
                    self.read_scattered(transport, registers).await
                }
            },
            ReadStrategy::Scattered => self.read_scattered(transport, registers).await,
        }
    }

    async fn read_scattered<T>(
        &mut self,
        transport: &mut T,
        registers: RegisterSet,
    ) -> Result<Vec<Vec<u8>>, TransportError>
    where
        T: ModbusTransport + ?Sized,
    {
        let mut chunks = Vec::with_capacity(registers.len());
        for register in registers.iter() {
            let descriptor = register.descriptor;
            let words = read_exact(
                transport,
                descriptor.address,
                u16::from(descriptor.word_count),
            )
            .await
            .inspect_err(|e| {
                warn!(
                    "failed to read {} @ {}: {}",
                    register.label, descriptor.address, e
                )
            })?;
            chunks.push(words_to_bytes(&words));

            transport.sleep(self.config.pace_delay).await;
        }
        Ok(chunks)
    }

    async fn recover<T>(&mut self, transport: &mut T, cause: &TransportError)
    where
        T: ModbusTransport + ?Sized,
    {
        self.transition(PollState::Recovering);
        warn!("communication error ({}), resetting transport", cause);

        if let Err(e) = transport.flush().await {
            warn!("transport flush failed: {}", e);
        }
        if let Err(e) = transport.close().await {
            warn!("transport close failed: {}", e);
        }
        if let Err(e) = transport.open().await {
            warn!("transport reopen failed: {}", e);
        }
        transport.sleep(self.config.recovery_cooldown).await;

        self.communication.last_poll_failed = true;
    }

    fn transition(&mut self, next: PollState) {
        trace!("poll state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

async fn read_bulk<T>(
    transport: &mut T,
    registers: RegisterSet,
    address: u16,
    count: u16,
) -> Result<Vec<Vec<u8>>, TransportError>
where
    T: ModbusTransport + ?Sized,
{
    let words = read_exact(transport, address, count)
        .await
        .inspect_err(|e| warn!("failed to read {} words @ {}: {}", count, address, e))?;

    let mut offset = 0;
    let chunks = registers
        .iter()
        .map(|register| {
            let width = usize::from(register.descriptor.word_count);
            let chunk = words.get(offset..offset + width).unwrap_or_default();
            offset += width;
            words_to_bytes(chunk)
        })
        .collect();
    Ok(chunks)
}

/// Read exactly `count` words; anything else is a corrupted response.
pub(crate) async fn read_exact<T>(
    transport: &mut T,
    address: u16,
    count: u16,
) -> Result<Vec<u16>, TransportError>
where
    T: ModbusTransport + ?Sized,
{
    let words = transport.read_registers(address, count).await?;
    if words.len() != usize::from(count) {
        return Err(TransportError::ShortRead {
            address,
            expected: count,
            found: words.len(),
        });
    }
    Ok(words)
}

/// Registers as transmitted: big-endian words, in address order.
pub(crate) fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_be_bytes()).collect()
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
