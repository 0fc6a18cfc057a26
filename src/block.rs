use core::{fmt, mem, ptr::NonNull};

use crate::{
  align::checked_align_up,
  align_down, align_up,
  error::{Error, Result},
  field::{Field, FieldLayout, Offset},
};

/// Byte pattern written to guard regions when poisoning is compiled in.
pub const POISON_PATTERN: [u8; 8] = [0x92, 0x88, 0x0a, 0x00, 0xec, 0xdc, 0xae, 0x4e];

/// Outcome of [`Block::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
  Valid,
  /// Header is not on the block alignment boundary.
  Misaligned,
  /// The next block does not point back at this one.
  NextMismatched,
  /// The previous block does not point forward at this one.
  PrevMismatched,
  /// A guard region was overwritten.
  PoisonCorrupted,
}

impl BlockStatus {
  pub fn is_valid(self) -> bool {
    self == BlockStatus::Valid
  }
}

/// Intrusive header placed at the start of every chunk of a managed region.
///
/// ```text
///   ┌──────────────┬─────────┬──────────────────────────┬─────────┐
///   │ prev │ next  │  guard  │       usable space       │  guard  │
///   └──────────────┴─────────┴──────────────────────────┴─────────┘
///   ▲                        ▲
///   │                        └── Block::usable_space
///   └── Block
///
///   <──────────────────────── outer_size ───────────────────────────>
///                            <────── inner_size ───────>
/// ```
///
/// `prev` holds the distance back to the previous header plus the *used*
/// flag, `next` holds the distance to the next header (which is also this
/// block's outer size) plus the *last* flag. Both distances are stored in
/// units of [`Block::ALIGN`]. Spare high bits of each field are handed out
/// as custom flags, see [`Block::set_flags`].
///
/// Type parameters:
///
/// - `O`: raw integer used for each field. Narrower types shrink the header
///   and the addressable range.
/// - `MAX_SIZE`: largest region the caller intends to manage. Lowering it
///   frees up field bits for custom flags.
/// - `POISON`: write and check guard bytes around the usable space. When
///   `false` the guards take no space and all poison code is skipped.
///
/// Blocks are handled through `NonNull<Block>` handles. Operations that
/// split or merge return the handle to use afterwards; a handle to a block
/// that was absorbed by a merge must not be used again.
#[repr(C)]
pub struct Block<O: Offset = usize, const MAX_SIZE: usize = { usize::MAX }, const POISON: bool = false> {
  prev: Field<O>,
  next: Field<O>,
}

impl<O: Offset, const MAX_SIZE: usize, const POISON: bool> Block<O, MAX_SIZE, POISON> {
  /// Alignment of every header and of every inner size.
  pub const ALIGN: usize = mem::align_of::<Self>();

  pub const HEADER_SIZE: usize = mem::size_of::<Self>();

  /// Size of each of the two guard regions.
  pub const GUARD_SIZE: usize = if POISON { align_up!(POISON_PATTERN.len(), Self::ALIGN) } else { 0 };

  /// Bytes of every block that are not usable space.
  pub const BLOCK_OVERHEAD: usize = Self::HEADER_SIZE + 2 * Self::GUARD_SIZE;

  const SIZE_LIMIT: usize = if MAX_SIZE < isize::MAX as usize { MAX_SIZE } else { isize::MAX as usize };

  const LAYOUT: FieldLayout = FieldLayout::new(O::BITS, Self::offset_bits());

  /// Largest region [`Block::init`] accepts for this instantiation.
  pub const MAX_REGION_SIZE: usize = {
    let max_units = Self::LAYOUT.max_offset();
    let limit_units = (Self::SIZE_LIMIT / Self::ALIGN) as u64;
    let units = if max_units < limit_units { max_units } else { limit_units };
    units as usize * Self::ALIGN
  };

  /// Number of caller-defined flag bits available through
  /// [`Block::set_flags`].
  pub const CUSTOM_FLAG_BITS: u32 = 2 * Self::LAYOUT.custom_bits();

  const fn offset_bits() -> u32 {
    let units = Self::SIZE_LIMIT / Self::ALIGN;
    let required = usize::BITS - units.leading_zeros();
    let available = O::BITS - 1;
    if required < available { required } else { available }
  }

  fn with_sizes(
    prev_offset: usize,
    outer_size: usize,
  ) -> Self {
    let mut header = Self {
      prev: Field::empty(),
      next: Field::empty(),
    };
    header.set_prev_offset(prev_offset);
    header.set_outer_size(outer_size);
    header
  }

  /// Turns `region` into a single free block that is also the last one.
  ///
  /// A trailing part of `region` smaller than [`Block::ALIGN`] is left out.
  /// The returned handle is valid for as long as `region` stays borrowed by
  /// whoever manages the blocks.
  pub fn init(region: &mut [u8]) -> Result<NonNull<Self>> {
    if region.as_ptr() as usize % Self::ALIGN != 0 {
      return Err(Error::InvalidArgument);
    }
    let outer_size = align_down!(region.len(), Self::ALIGN);
    if outer_size > Self::MAX_REGION_SIZE {
      return Err(Error::OutOfRange);
    }
    if outer_size < Self::BLOCK_OVERHEAD {
      return Err(Error::ResourceExhausted);
    }

    let block = NonNull::from(region).cast::<Self>();

    // Safety: the region is aligned for `Self`, exclusively borrowed and at
    // least `BLOCK_OVERHEAD` bytes long.
    unsafe {
      let mut header = Self::with_sizes(0, outer_size);
      header.set_last(true);
      block.write(header);
      Self::poison(block);
    }

    Ok(block)
  }

  /// Total bytes of the block, header and guards included.
  #[inline]
  pub fn outer_size(&self) -> usize {
    self.next.offset(Self::LAYOUT) as usize * Self::ALIGN
  }

  /// Bytes available to the caller.
  #[inline]
  pub fn inner_size(&self) -> usize {
    self.outer_size() - Self::BLOCK_OVERHEAD
  }

  #[inline]
  pub fn used(&self) -> bool {
    self.prev.flag(Self::LAYOUT)
  }

  #[inline]
  pub fn last(&self) -> bool {
    self.next.flag(Self::LAYOUT)
  }

  pub fn mark_used(&mut self) {
    self.prev.set_flag(Self::LAYOUT, true);
  }

  pub fn mark_free(&mut self) {
    self.prev.set_flag(Self::LAYOUT, false);
  }

  /// Returns the custom flags. Bits coming from the `next` field occupy the
  /// low half, bits from the `prev` field the high half.
  pub fn flags(&self) -> u64 {
    let per_field = Self::LAYOUT.custom_bits();
    (self.prev.custom(Self::LAYOUT) << per_field) | self.next.custom(Self::LAYOUT)
  }

  /// Clears `clear` and then sets `set`, so bits in both end up set. Bits
  /// beyond [`Block::CUSTOM_FLAG_BITS`] are ignored.
  pub fn set_flags(
    &mut self,
    set: u64,
    clear: u64,
  ) {
    let per_field = Self::LAYOUT.custom_bits();
    let flags = (self.flags() & !clear) | set;
    self.next.set_custom(Self::LAYOUT, flags);
    self.prev.set_custom(Self::LAYOUT, flags >> per_field);
  }

  fn prev_offset(&self) -> usize {
    self.prev.offset(Self::LAYOUT) as usize * Self::ALIGN
  }

  fn set_prev_offset(
    &mut self,
    bytes: usize,
  ) {
    self.prev.set_offset(Self::LAYOUT, (bytes / Self::ALIGN) as u64);
  }

  fn set_outer_size(
    &mut self,
    bytes: usize,
  ) {
    self.next.set_offset(Self::LAYOUT, (bytes / Self::ALIGN) as u64);
  }

  fn set_last(
    &mut self,
    last: bool,
  ) {
    self.next.set_flag(Self::LAYOUT, last);
  }

  /// Returns the block that follows `block`, or `None` if `block` is the
  /// last one.
  ///
  /// # Safety
  ///
  /// `block` must point to a live header of an initialized region. The same
  /// contract applies to every function here that takes a `NonNull<Block>`.
  #[inline]
  pub unsafe fn next(block: NonNull<Self>) -> Option<NonNull<Self>> {
    unsafe {
      let header = block.as_ref();
      if header.last() {
        return None;
      }
      Some(block.byte_add(header.outer_size()))
    }
  }

  /// Returns the block before `block`, or `None` for the first block.
  #[inline]
  pub unsafe fn prev(block: NonNull<Self>) -> Option<NonNull<Self>> {
    unsafe {
      let offset = block.as_ref().prev_offset();
      if offset == 0 {
        return None;
      }
      Some(block.byte_sub(offset))
    }
  }

  /// Address handed out to callers for `block`.
  #[inline]
  pub unsafe fn usable_space(block: NonNull<Self>) -> NonNull<u8> {
    unsafe { block.cast::<u8>().add(Self::HEADER_SIZE + Self::GUARD_SIZE) }
  }

  /// Inverse of [`Block::usable_space`].
  ///
  /// # Safety
  ///
  /// `ptr` must be exactly the usable space address of a live block. Any
  /// other address yields a handle to garbage.
  #[inline]
  pub unsafe fn from_usable_space(ptr: NonNull<u8>) -> NonNull<Self> {
    unsafe { ptr.sub(Self::HEADER_SIZE + Self::GUARD_SIZE).cast() }
  }

  /// Shrinks `block` to `inner_size` (rounded up to [`Block::ALIGN`]) and
  /// turns the rest into a new free block, which is returned. `block` keeps
  /// its address and its custom flags; the new block starts with none.
  ///
  /// Fails with [`Error::FailedPrecondition`] if `block` is used,
  /// [`Error::OutOfRange`] if it is too small and
  /// [`Error::ResourceExhausted`] if the rest cannot hold a block. Nothing
  /// is modified on failure.
  pub unsafe fn split(
    block: NonNull<Self>,
    inner_size: usize,
  ) -> Result<NonNull<Self>> {
    unsafe {
      let header = block.as_ptr();
      if (*header).used() {
        return Err(Error::FailedPrecondition);
      }

      let inner_size = checked_align_up(inner_size, Self::ALIGN).ok_or(Error::OutOfRange)?;
      if inner_size > (*header).inner_size() {
        return Err(Error::OutOfRange);
      }

      let outer_size = inner_size + Self::BLOCK_OVERHEAD;
      let remainder = (*header).outer_size() - outer_size;
      if remainder < Self::BLOCK_OVERHEAD {
        return Err(Error::ResourceExhausted);
      }

      let trailing = block.byte_add(outer_size);
      let mut tail = Self::with_sizes(outer_size, remainder);
      tail.set_last((*header).last());
      trailing.write(tail);

      (*header).set_outer_size(outer_size);
      (*header).set_last(false);

      if let Some(next) = Self::next(trailing) {
        (*next.as_ptr()).set_prev_offset(remainder);
      }

      Self::poison(block);
      Self::poison(trailing);

      Ok(trailing)
    }
  }

  /// Absorbs the block after `block`. The merged block keeps the address and
  /// custom flags of `block` and takes over the *last* flag of the absorbed
  /// one.
  pub unsafe fn merge_next(block: NonNull<Self>) -> Result<NonNull<Self>> {
    unsafe {
      let next = Self::next(block).ok_or(Error::OutOfRange)?;
      if block.as_ref().used() || next.as_ref().used() {
        return Err(Error::FailedPrecondition);
      }

      let outer_size = block.as_ref().outer_size() + next.as_ref().outer_size();
      let last = next.as_ref().last();

      let header = block.as_ptr();
      (*header).set_outer_size(outer_size);
      (*header).set_last(last);

      if let Some(after) = Self::next(block) {
        (*after.as_ptr()).set_prev_offset(outer_size);
      }

      Self::poison(block);

      Ok(block)
    }
  }

  /// Merges `block` into its predecessor and returns the predecessor.
  /// `block` is gone afterwards.
  pub unsafe fn merge_prev(block: NonNull<Self>) -> Result<NonNull<Self>> {
    unsafe {
      let prev = Self::prev(block).ok_or(Error::OutOfRange)?;
      Self::merge_next(prev)
    }
  }

  /// Checks whether [`Block::alloc_first`] would succeed and returns the
  /// number of bytes it would split off the front: either zero or enough for
  /// a whole free block.
  pub unsafe fn can_alloc_first(
    block: NonNull<Self>,
    inner_size: usize,
    alignment: usize,
  ) -> Result<usize> {
    unsafe {
      let header = block.as_ref();
      if header.used() {
        return Err(Error::FailedPrecondition);
      }

      let alignment = alignment.max(Self::ALIGN);
      debug_assert!(alignment.is_power_of_two());
      let inner_size = checked_align_up(inner_size, Self::ALIGN).ok_or(Error::OutOfRange)?;

      let usable = Self::usable_space(block).as_ptr() as usize;
      let aligned = checked_align_up(usable, alignment).ok_or(Error::OutOfRange)?;
      let mut padding = aligned - usable;
      if padding != 0 && padding < Self::BLOCK_OVERHEAD {
        let aligned = checked_align_up(usable + Self::BLOCK_OVERHEAD, alignment).ok_or(Error::OutOfRange)?;
        padding = aligned - usable;
      }

      match padding.checked_add(inner_size) {
        Some(needed) if needed <= header.inner_size() => Ok(padding),
        _ => Err(Error::OutOfRange),
      }
    }
  }

  /// Converts a free block into a used one of at least `inner_size` bytes
  /// whose usable space is aligned to `alignment`, taking space from the
  /// front of `block`. Padding needed for the alignment becomes a free
  /// block before the returned one; leftover space becomes a free block
  /// after it when it is large enough.
  pub unsafe fn alloc_first(
    block: NonNull<Self>,
    inner_size: usize,
    alignment: usize,
  ) -> Result<NonNull<Self>> {
    unsafe {
      let padding = Self::can_alloc_first(block, inner_size, alignment)?;

      let mut block = block;
      if padding != 0 {
        block = Self::split(block, padding - Self::BLOCK_OVERHEAD)?;
      }

      match Self::split(block, inner_size) {
        Ok(_) | Err(Error::ResourceExhausted) => {}
        Err(err) => return Err(err),
      }

      (*block.as_ptr()).mark_used();
      Ok(block)
    }
  }

  /// Checks whether [`Block::alloc_last`] would succeed and returns the
  /// number of bytes it would split off the front.
  pub unsafe fn can_alloc_last(
    block: NonNull<Self>,
    inner_size: usize,
    alignment: usize,
  ) -> Result<usize> {
    unsafe {
      let header = block.as_ref();
      if header.used() {
        return Err(Error::FailedPrecondition);
      }

      let alignment = alignment.max(Self::ALIGN);
      debug_assert!(alignment.is_power_of_two());
      let inner_size = checked_align_up(inner_size, Self::ALIGN).ok_or(Error::OutOfRange)?;
      if header.inner_size() < inner_size {
        return Err(Error::OutOfRange);
      }

      let usable = Self::usable_space(block).as_ptr() as usize;
      let usable_end = usable + header.inner_size();
      let start = align_down!(usable_end - inner_size, alignment);
      if start < usable {
        return Err(Error::ResourceExhausted);
      }

      let leading = start - usable;
      if leading >= Self::BLOCK_OVERHEAD {
        Ok(leading)
      } else if usable % alignment == 0 {
        // Too close to the front for a header, but the block itself is
        // aligned: hand out all of it.
        Ok(0)
      } else {
        Err(Error::ResourceExhausted)
      }
    }
  }

  /// Like [`Block::alloc_first`], but the used block is carved from the end
  /// of `block` and the leftover space stays in front of it.
  pub unsafe fn alloc_last(
    block: NonNull<Self>,
    inner_size: usize,
    alignment: usize,
  ) -> Result<NonNull<Self>> {
    unsafe {
      let leading = Self::can_alloc_last(block, inner_size, alignment)?;

      let mut block = block;
      if leading != 0 {
        block = Self::split(block, leading - Self::BLOCK_OVERHEAD)?;
      }

      (*block.as_ptr()).mark_used();
      Ok(block)
    }
  }

  /// Grows or shrinks a used block in place. Growing only works by taking
  /// over a free block right after it. On failure the block is left exactly
  /// as it was; either way it is still used when this returns.
  pub unsafe fn resize(
    block: NonNull<Self>,
    new_inner_size: usize,
  ) -> Result<()> {
    unsafe {
      let header = block.as_ptr();
      if !(*header).used() {
        return Err(Error::FailedPrecondition);
      }

      let old_inner_size = (*header).inner_size();
      (*header).mark_free();

      if let Some(next) = Self::next(block) {
        if !next.as_ref().used() {
          let merged = Self::merge_next(block);
          debug_assert!(merged.is_ok(), "merging two free neighbours failed: {merged:?}");
        }
      }

      let result = match Self::split(block, new_inner_size) {
        Ok(_) | Err(Error::ResourceExhausted) => Ok(()),
        Err(err) => {
          // The old size fitted before the merge, so only a remainder too
          // small for a block can get in the way.
          let restored = Self::split(block, old_inner_size);
          debug_assert!(
            matches!(restored, Ok(_) | Err(Error::ResourceExhausted)),
            "restoring {old_inner_size} bytes failed: {restored:?}"
          );
          Err(err)
        }
      };

      (*header).mark_used();
      result
    }
  }

  /// Marks `block` free and merges it with free neighbours. Returns the
  /// resulting block, which starts at the previous block when that one was
  /// free.
  pub unsafe fn free(block: NonNull<Self>) -> NonNull<Self> {
    unsafe {
      (*block.as_ptr()).mark_free();

      let mut block = block;
      if let Some(prev) = Self::prev(block) {
        if !prev.as_ref().used() {
          if let Ok(merged) = Self::merge_next(prev) {
            block = merged;
          }
        }
      }

      if let Some(next) = Self::next(block) {
        if !next.as_ref().used() {
          if let Ok(merged) = Self::merge_next(block) {
            block = merged;
          }
        }
      }

      block
    }
  }

  /// Checks alignment, neighbour consistency and guard bytes, in that order.
  pub unsafe fn status(block: NonNull<Self>) -> BlockStatus {
    if block.as_ptr() as usize % Self::ALIGN != 0 {
      return BlockStatus::Misaligned;
    }

    unsafe {
      let header = block.as_ref();

      if let Some(next) = Self::next(block) {
        if next.as_ref().prev_offset() != header.outer_size() {
          return BlockStatus::NextMismatched;
        }
      }

      if let Some(prev) = Self::prev(block) {
        let prev = prev.as_ref();
        if prev.last() || prev.outer_size() != header.prev_offset() {
          return BlockStatus::PrevMismatched;
        }
      }

      if !Self::poison_intact(block) {
        return BlockStatus::PoisonCorrupted;
      }
    }

    BlockStatus::Valid
  }

  pub unsafe fn is_valid(block: NonNull<Self>) -> bool {
    unsafe { Self::status(block).is_valid() }
  }

  /// Panics if `block` is not valid. Meant for debugging heap corruption,
  /// not for control flow.
  pub unsafe fn crash_if_invalid(block: NonNull<Self>) {
    let status = unsafe { Self::status(block) };
    if !status.is_valid() {
      log::error!("heap corruption at {:p}: {:?}", block, status);
      panic!("invalid block at {:p}: {:?}", block, status);
    }
  }

  unsafe fn poison(block: NonNull<Self>) {
    if !POISON {
      return;
    }
    unsafe {
      let (leading, trailing) = Self::guards(block);
      for (i, byte) in POISON_PATTERN.iter().cycle().take(Self::GUARD_SIZE).enumerate() {
        leading.add(i).write(*byte);
        trailing.add(i).write(*byte);
      }
    }
  }

  unsafe fn poison_intact(block: NonNull<Self>) -> bool {
    if !POISON {
      return true;
    }
    unsafe {
      let (leading, trailing) = Self::guards(block);
      POISON_PATTERN
        .iter()
        .cycle()
        .take(Self::GUARD_SIZE)
        .enumerate()
        .all(|(i, byte)| leading.add(i).read() == *byte && trailing.add(i).read() == *byte)
    }
  }

  unsafe fn guards(block: NonNull<Self>) -> (NonNull<u8>, NonNull<u8>) {
    unsafe {
      let start = block.cast::<u8>();
      let outer_size = block.as_ref().outer_size();
      (
        start.add(Self::HEADER_SIZE),
        start.add(outer_size - Self::GUARD_SIZE),
      )
    }
  }
}

impl<O: Offset, const MAX_SIZE: usize, const POISON: bool> fmt::Debug for Block<O, MAX_SIZE, POISON> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Block")
      .field("outer_size", &self.outer_size())
      .field("prev_offset", &self.prev_offset())
      .field("used", &self.used())
      .field("last", &self.last())
      .field("flags", &self.flags())
      .finish()
  }
}
