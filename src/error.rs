use thiserror::Error;

/// Reasons a block or allocator operation can be rejected. Every variant is
/// recoverable; the only fatal path in the crate is
/// [`crate::Block::crash_if_invalid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
  /// Region or pointer is not on the required boundary.
  #[error("address is not aligned to the block header alignment")]
  InvalidArgument,
  /// Not enough space left to form a valid block.
  #[error("not enough space to form a block")]
  ResourceExhausted,
  /// Requested size exceeds what the block or the instantiation can address,
  /// or the pointer does not belong to any block.
  #[error("size or pointer out of range")]
  OutOfRange,
  /// Operation requires a free block but got a used one, or vice versa.
  #[error("block is in the wrong state for this operation")]
  FailedPrecondition,
}

pub type Result<T> = core::result::Result<T, Error>;
