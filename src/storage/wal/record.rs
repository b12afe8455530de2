//! WAL record types and serialization.

use serde::{Deserialize, Serialize};

use crate::error::{PageSeqError, Result};
use crate::types::{LessonId, Page, PageId, QuestionBinding};

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum WalRecordType {
    /// Begin a new transaction.
    BeginTransaction = 1,
    /// Commit a transaction.
    Commit = 2,
    /// Abort a transaction.
    Abort = 3,
    /// Insert a page row.
    PageInsertion = 30,
    /// Overwrite a page row.
    PageUpdate = 31,
    /// Delete a page row.
    PageDeletion = 32,
    /// Insert a question binding.
    BindingInsertion = 40,
    /// Overwrite a question binding.
    BindingUpdate = 41,
    /// Checkpoint marker.
    Checkpoint = 254,
}

impl TryFrom<u8> for WalRecordType {
    type Error = ();

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(WalRecordType::BeginTransaction),
            2 => Ok(WalRecordType::Commit),
            3 => Ok(WalRecordType::Abort),
            30 => Ok(WalRecordType::PageInsertion),
            31 => Ok(WalRecordType::PageUpdate),
            32 => Ok(WalRecordType::PageDeletion),
            40 => Ok(WalRecordType::BindingInsertion),
            41 => Ok(WalRecordType::BindingUpdate),
            254 => Ok(WalRecordType::Checkpoint),
            _ => Err(()),
        }
    }
}

/// Payload for a WAL record.
///
/// Data payloads carry full row images, so replaying a record onto a state
/// that already contains it converges to the same row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalPayload {
    /// Begin transaction payload.
    BeginTransaction {
        /// Transaction ID.
        tx_id: u64,
        /// Lesson the transaction is scoped to.
        lesson_id: LessonId,
    },
    /// Commit transaction payload.
    Commit {
        /// Transaction ID.
        tx_id: u64,
    },
    /// Abort transaction payload.
    Abort {
        /// Transaction ID.
        tx_id: u64,
    },
    /// New page row.
    PageInsertion {
        /// The inserted row.
        page: Page,
    },
    /// Replacement page row.
    PageUpdate {
        /// The row after the update.
        page: Page,
    },
    /// Page row removal.
    PageDeletion {
        /// Owning lesson.
        lesson_id: LessonId,
        /// Removed page.
        page_id: PageId,
    },
    /// New binding row.
    BindingInsertion {
        /// The inserted binding.
        binding: QuestionBinding,
    },
    /// Replacement binding row.
    BindingUpdate {
        /// The binding after the update.
        binding: QuestionBinding,
    },
    /// Checkpoint payload.
    Checkpoint {
        /// Checkpoint ID.
        checkpoint_id: u64,
    },
}

impl WalPayload {
    /// Returns the record type matching this payload.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            WalPayload::BeginTransaction { .. } => WalRecordType::BeginTransaction,
            WalPayload::Commit { .. } => WalRecordType::Commit,
            WalPayload::Abort { .. } => WalRecordType::Abort,
            WalPayload::PageInsertion { .. } => WalRecordType::PageInsertion,
            WalPayload::PageUpdate { .. } => WalRecordType::PageUpdate,
            WalPayload::PageDeletion { .. } => WalRecordType::PageDeletion,
            WalPayload::BindingInsertion { .. } => WalRecordType::BindingInsertion,
            WalPayload::BindingUpdate { .. } => WalRecordType::BindingUpdate,
            WalPayload::Checkpoint { .. } => WalRecordType::Checkpoint,
        }
    }

    /// Returns true for payloads that change table rows.
    #[must_use]
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            WalPayload::PageInsertion { .. }
                | WalPayload::PageUpdate { .. }
                | WalPayload::PageDeletion { .. }
                | WalPayload::BindingInsertion { .. }
                | WalPayload::BindingUpdate { .. }
        )
    }

    /// Returns the lesson whose rows this payload touches.
    #[must_use]
    pub fn lesson_id(&self) -> Option<LessonId> {
        match self {
            WalPayload::BeginTransaction { lesson_id, .. }
            | WalPayload::PageDeletion { lesson_id, .. } => Some(*lesson_id),
            WalPayload::PageInsertion { page } | WalPayload::PageUpdate { page } => {
                Some(page.lesson_id)
            }
            WalPayload::BindingInsertion { binding } | WalPayload::BindingUpdate { binding } => {
                Some(binding.lesson_id)
            }
            _ => None,
        }
    }
}

/// A single WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    /// Type of this record.
    pub record_type: WalRecordType,
    /// Transaction ID that owns this record.
    pub transaction_id: u64,
    /// Log Sequence Number (monotonically increasing).
    pub lsn: u64,
    /// Record payload.
    pub payload: WalPayload,
}

impl WalRecord {
    /// Creates a new WAL record.
    #[must_use]
    pub fn new(
        record_type: WalRecordType,
        transaction_id: u64,
        lsn: u64,
        payload: WalPayload,
    ) -> Self {
        Self {
            record_type,
            transaction_id,
            lsn,
            payload,
        }
    }

    /// Creates a record whose type is derived from the payload.
    #[must_use]
    pub fn data(transaction_id: u64, lsn: u64, payload: WalPayload) -> Self {
        Self::new(payload.record_type(), transaction_id, lsn, payload)
    }

    /// Creates a begin transaction record.
    #[must_use]
    pub fn begin_transaction(tx_id: u64, lsn: u64, lesson_id: LessonId) -> Self {
        Self::new(
            WalRecordType::BeginTransaction,
            tx_id,
            lsn,
            WalPayload::BeginTransaction { tx_id, lesson_id },
        )
    }

    /// Creates a commit record.
    #[must_use]
    pub fn commit(tx_id: u64, lsn: u64) -> Self {
        Self::new(
            WalRecordType::Commit,
            tx_id,
            lsn,
            WalPayload::Commit { tx_id },
        )
    }

    /// Creates an abort record.
    #[must_use]
    pub fn abort(tx_id: u64, lsn: u64) -> Self {
        Self::new(
            WalRecordType::Abort,
            tx_id,
            lsn,
            WalPayload::Abort { tx_id },
        )
    }

    /// Creates a checkpoint record.
    #[must_use]
    pub fn checkpoint(tx_id: u64, lsn: u64, checkpoint_id: u64) -> Self {
        Self::new(
            WalRecordType::Checkpoint,
            tx_id,
            lsn,
            WalPayload::Checkpoint { checkpoint_id },
        )
    }

    /// Serializes the record to bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| PageSeqError::WalError(format!("Failed to serialize WAL record: {e}")))
    }

    /// Deserializes a record from bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data)
            .map_err(|e| PageSeqError::WalError(format!("Failed to deserialize WAL record: {e}")))
    }
}
