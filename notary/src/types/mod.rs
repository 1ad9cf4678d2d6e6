//! Records flowing through the pipeline.

/// Unsigned record read from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub message: Vec<u8>,
}

impl Record {
    pub fn new(id: i64, message: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            message: message.into(),
        }
    }
}

/// Signature of one [`Record`], attributed to the key that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRecord {
    /// Id of the originating record.
    pub id: i64,
    /// Upper-case hex signature of the record message.
    pub signature: String,
    /// Upper-case hex public key of the signer.
    pub signer: String,
}

/// Signed records of one batch, in the order the records were read.
///
/// Only complete batches are ever forwarded to the sink.
pub type SignedBatch = Vec<SignedRecord>;
