use thiserror::Error;

/// Decode failures recognized by the block codec.
///
/// Encoding cannot fail: output buffers are caller-sized (see
/// [`BlockCodec::max_compressed_len`](crate::BlockCodec::max_compressed_len))
/// and an undersized buffer is a caller bug surfaced by a panic.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The input bytes do not describe a valid block: a header bit width
    /// above 32, a patch width above 32, or an exception position outside
    /// the block.
    #[error("corrupt block header")]
    CorruptHeader,

    /// Fewer input bytes remain than the block's strategy requires.
    #[error("encoded block truncated")]
    Truncated,
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
