//! Crash-atomic persistence of the ADCS state snapshot.
//!
//! Two fixed slots alternate. Each slot holds the 25-byte record followed by
//! an 8-byte commit marker (`sequence`, `!sequence`). A write invalidates the
//! target slot's marker, writes the record, then writes the marker, so a power
//! loss at any byte leaves the previously committed slot untouched.

use crate::hal::{NvmDevice, NvmError};
use crate::state::{AdcsState, OperatingMode};
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};
use static_assertions::{const_assert, const_assert_eq};
use thiserror::Error;
use tracing::{debug, warn};

/// CRC-32/ISO-HDLC, the Ethernet/ZIP polynomial.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// mode (1) + entry time (4) + angular velocity (3 x 4) + power level (4)
pub const PAYLOAD_SIZE: usize = 21;
pub const RECORD_SIZE: usize = PAYLOAD_SIZE + 4;
const COMMIT_SIZE: usize = 8;
pub const SLOT_SIZE: usize = RECORD_SIZE + COMMIT_SIZE;
/// Distance between slot starts, leaving room for page alignment.
pub const SLOT_STRIDE: u32 = 64;
pub const NUM_SLOTS: usize = 2;
pub const DEFAULT_MAX_WRITE_ATTEMPTS: u8 = 3;

const_assert_eq!(RECORD_SIZE, 25);
const_assert!(SLOT_SIZE <= SLOT_STRIDE as usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("persisted state failed checksum validation")]
    CorruptState,
    #[error("no committed state record")]
    Empty,
    #[error("NVM access failed: {0}")]
    Nvm(#[from] NvmError),
    #[error("state write abandoned after {attempts} attempts")]
    WriteFailure { attempts: u8 },
}

/// On-NVM projection of [`AdcsState`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub mode: OperatingMode,
    pub entry_time_ms: u32,
    pub angular_velocity: [f32; 3],
    pub power_level_w: f32,
}

impl PersistedRecord {
    pub fn from_state(state: &AdcsState) -> Self {
        Self {
            mode: state.current_mode,
            entry_time_ms: state.mode_entry_time_ms,
            angular_velocity: state.angular_velocity,
            power_level_w: state.power_level_w,
        }
    }

    fn payload_bytes(&self) -> [u8; PAYLOAD_SIZE] {
        let mut payload = [0u8; PAYLOAD_SIZE];
        payload[0] = self.mode.as_byte();
        payload[1..5].copy_from_slice(&self.entry_time_ms.to_le_bytes());
        for (axis, value) in self.angular_velocity.iter().enumerate() {
            let start = 5 + axis * 4;
            payload[start..start + 4].copy_from_slice(&value.to_le_bytes());
        }
        payload[17..21].copy_from_slice(&self.power_level_w.to_le_bytes());
        payload
    }

    pub fn checksum(&self) -> u32 {
        CRC32.checksum(&self.payload_bytes())
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[..PAYLOAD_SIZE].copy_from_slice(&self.payload_bytes());
        bytes[PAYLOAD_SIZE..].copy_from_slice(&self.checksum().to_le_bytes());
        bytes
    }

    /// Decodes a record, recomputing the checksum. Any mismatch, or a mode
    /// byte outside the known set, is reported as corrupt.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Result<Self, StoreError> {
        let stored = u32::from_le_bytes(read_word(bytes, PAYLOAD_SIZE));
        if CRC32.checksum(&bytes[..PAYLOAD_SIZE]) != stored {
            return Err(StoreError::CorruptState);
        }

        let mode = OperatingMode::from_byte(bytes[0]).ok_or(StoreError::CorruptState)?;
        let mut angular_velocity = [0.0f32; 3];
        for (axis, value) in angular_velocity.iter_mut().enumerate() {
            *value = f32::from_le_bytes(read_word(bytes, 5 + axis * 4));
        }

        Ok(Self {
            mode,
            entry_time_ms: u32::from_le_bytes(read_word(bytes, 1)),
            angular_velocity,
            power_level_w: f32::from_le_bytes(read_word(bytes, 17)),
        })
    }
}

fn read_word(bytes: &[u8], start: usize) -> [u8; 4] {
    [bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]
}

fn commit_marker(sequence: u32) -> [u8; COMMIT_SIZE] {
    let mut marker = [0u8; COMMIT_SIZE];
    marker[..4].copy_from_slice(&sequence.to_le_bytes());
    marker[4..].copy_from_slice(&(!sequence).to_le_bytes());
    marker
}

/// Sequence numbers wrap; `a` is newer than `b` when it is less than half the
/// sequence space ahead.
fn is_newer(a: u32, b: u32) -> bool {
    let ahead = a.wrapping_sub(b);
    ahead != 0 && ahead < 0x8000_0000
}

fn next_sequence(sequence: u32) -> u32 {
    // zero is reserved so an all-zero marker never reads as committed
    match sequence.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CommittedSlot {
    slot: u8,
    sequence: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_writes: u32,
    pub abandoned_writes: u32,
    pub failed_attempts: u32,
    pub active_slot: Option<u8>,
    pub last_sequence: u32,
}

/// Checksummed, dual-slot store for the last known ADCS state.
#[derive(Debug)]
pub struct PersistentStateStore<N: NvmDevice> {
    device: N,
    base_offset: u32,
    max_write_attempts: u8,
    active: Option<CommittedSlot>,
    scanned: bool,
    stats: StoreStats,
}

impl<N: NvmDevice> PersistentStateStore<N> {
    pub fn new(device: N, base_offset: u32, max_write_attempts: u8) -> Self {
        Self {
            device,
            base_offset,
            max_write_attempts: max_write_attempts.max(1),
            active: None,
            scanned: false,
            stats: StoreStats::default(),
        }
    }

    pub fn with_defaults(device: N) -> Self {
        Self::new(device, 0, DEFAULT_MAX_WRITE_ATTEMPTS)
    }

    fn slot_offset(&self, slot: u8) -> u32 {
        self.base_offset + u32::from(slot) * SLOT_STRIDE
    }

    /// Reads one slot. Returns the commit sequence (if committed) together
    /// with the decoded record.
    fn read_slot(
        &mut self,
        slot: u8,
    ) -> Result<Option<(u32, Result<PersistedRecord, StoreError>)>, StoreError> {
        let mut raw = [0u8; SLOT_SIZE];
        self.device.read(self.slot_offset(slot), &mut raw)?;

        let sequence = u32::from_le_bytes(read_word(&raw, RECORD_SIZE));
        let check = u32::from_le_bytes(read_word(&raw, RECORD_SIZE + 4));
        if sequence == 0 || check != !sequence {
            return Ok(None);
        }

        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(&raw[..RECORD_SIZE]);
        Ok(Some((sequence, PersistedRecord::from_bytes(&record))))
    }

    /// Loads the newest committed record.
    ///
    /// A committed slot whose checksum fails is reported as
    /// [`StoreError::CorruptState`] even when an older slot is still valid:
    /// stale state is never silently substituted for the latest snapshot.
    pub fn read(&mut self) -> Result<PersistedRecord, StoreError> {
        let mut newest: Option<(CommittedSlot, Result<PersistedRecord, StoreError>)> = None;

        for slot in 0..NUM_SLOTS as u8 {
            if let Some((sequence, record)) = self.read_slot(slot)? {
                let replace = match &newest {
                    Some((current, _)) => is_newer(sequence, current.sequence),
                    None => true,
                };
                if replace {
                    newest = Some((CommittedSlot { slot, sequence }, record));
                }
            }
        }

        self.scanned = true;
        self.active = newest.as_ref().map(|(committed, _)| *committed);
        self.stats.active_slot = self.active.map(|c| c.slot);

        match newest {
            Some((committed, Ok(record))) => {
                debug!(
                    slot = committed.slot,
                    sequence = committed.sequence,
                    mode = %record.mode,
                    "Loaded persisted state"
                );
                Ok(record)
            }
            Some((committed, Err(e))) => {
                warn!(
                    slot = committed.slot,
                    sequence = committed.sequence,
                    "Persisted state is corrupt"
                );
                Err(e)
            }
            None => Err(StoreError::Empty),
        }
    }

    /// Persists `state` into the slot not holding the newest commit.
    ///
    /// Device writes are retried up to the configured attempt count; when
    /// they are exhausted the write is abandoned and the previous commit
    /// remains the newest readable record.
    pub fn write(&mut self, state: &AdcsState) -> Result<(), StoreError> {
        if !self.scanned {
            // populates `active`; the record itself is not needed here
            match self.read() {
                Ok(_) | Err(StoreError::CorruptState | StoreError::Empty) => {}
                Err(e) => return Err(e),
            }
        }

        let (slot, sequence) = match self.active {
            Some(committed) => (
                (committed.slot + 1) % NUM_SLOTS as u8,
                next_sequence(committed.sequence),
            ),
            None => (0, 1),
        };

        let base = self.slot_offset(slot);
        let marker_offset = base + RECORD_SIZE as u32;
        let record = PersistedRecord::from_state(state).to_bytes();

        let result = self
            .write_with_retry(marker_offset, &[0xFF; COMMIT_SIZE])
            .and_then(|()| self.write_with_retry(base, &record))
            .and_then(|()| self.write_with_retry(marker_offset, &commit_marker(sequence)));

        match result {
            Ok(()) => {
                self.active = Some(CommittedSlot { slot, sequence });
                self.stats.total_writes = self.stats.total_writes.saturating_add(1);
                self.stats.active_slot = Some(slot);
                self.stats.last_sequence = sequence;
                debug!(slot, sequence, mode = %state.current_mode, "Persisted state");
                Ok(())
            }
            Err(e) => {
                self.stats.abandoned_writes = self.stats.abandoned_writes.saturating_add(1);
                warn!(slot, sequence, error = %e, "State write abandoned for this cycle");
                Err(e)
            }
        }
    }

    fn write_with_retry(&mut self, offset: u32, data: &[u8]) -> Result<(), StoreError> {
        for attempt in 1..=self.max_write_attempts {
            match self.device.write(offset, data) {
                Ok(()) => return Ok(()),
                Err(nb::Error::WouldBlock) => {
                    self.stats.failed_attempts = self.stats.failed_attempts.saturating_add(1);
                    debug!(offset, attempt, "NVM busy");
                }
                Err(nb::Error::Other(e)) => {
                    self.stats.failed_attempts = self.stats.failed_attempts.saturating_add(1);
                    debug!(offset, attempt, error = %e, "NVM write attempt failed");
                }
            }
        }
        Err(StoreError::WriteFailure { attempts: self.max_write_attempts })
    }

    pub fn get_stats(&self) -> &StoreStats {
        &self.stats
    }

    pub fn device(&self) -> &N {
        &self.device
    }

    /// Direct device access, used to inject faults in tests.
    pub fn device_mut(&mut self) -> &mut N {
        &mut self.device
    }

    pub fn into_device(self) -> N {
        self.device
    }
}
