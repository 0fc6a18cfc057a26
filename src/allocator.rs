use core::{alloc::Layout, marker::PhantomData, ptr::NonNull};

use crate::{
  align::checked_align_up,
  block::{Block, BlockStatus},
  error::{Error, Result},
  field::Offset,
};

/// Rule used to pick the free block that serves an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Lowest-address free block that fits.
  FirstFit,
  /// Highest-address free block that fits, carved from its end.
  LastFit,
  /// Smallest free block that fits. Ties go to the lowest address.
  BestFit,
  /// Largest free block that fits.
  WorstFit,
  /// First fit for requests of at least the allocator's threshold, last fit
  /// for smaller ones, keeping large and small allocations at opposite ends
  /// of the region.
  DualFirstFit,
}

/// Which end of the chosen block the allocation is carved from. Also decides
/// the scan direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
  First,
  Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Selection {
  FirstFound,
  Smallest,
  Largest,
}

impl Strategy {
  fn plan(
    self,
    size: usize,
    threshold: usize,
  ) -> (Placement, Selection) {
    match self {
      Strategy::FirstFit => (Placement::First, Selection::FirstFound),
      Strategy::LastFit => (Placement::Last, Selection::FirstFound),
      Strategy::BestFit => (Placement::First, Selection::Smallest),
      Strategy::WorstFit => (Placement::First, Selection::Largest),
      Strategy::DualFirstFit if size >= threshold => (Placement::First, Selection::FirstFound),
      Strategy::DualFirstFit => (Placement::Last, Selection::FirstFound),
    }
  }
}

/// Snapshot of how a region is carved up. Byte counts are inner sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
  pub capacity: usize,
  pub used_blocks: usize,
  pub free_blocks: usize,
  pub used_bytes: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

type Link<O, const MAX_SIZE: usize, const POISON: bool> = Option<NonNull<Block<O, MAX_SIZE, POISON>>>;

/// Forward iterator over every block of a region, used and free.
pub struct Blocks<'a, O: Offset, const MAX_SIZE: usize, const POISON: bool> {
  next: Link<O, MAX_SIZE, POISON>,
  marker: PhantomData<&'a Block<O, MAX_SIZE, POISON>>,
}

impl<O: Offset, const MAX_SIZE: usize, const POISON: bool> Iterator for Blocks<'_, O, MAX_SIZE, POISON> {
  type Item = NonNull<Block<O, MAX_SIZE, POISON>>;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.next?;
    // Safety: the allocator borrowed for `'a` keeps the list well formed.
    self.next = unsafe { Block::next(block) };
    Some(block)
  }
}

/// Backward iterator over every block of a region, last block first.
pub struct BlocksRev<'a, O: Offset, const MAX_SIZE: usize, const POISON: bool> {
  next: Link<O, MAX_SIZE, POISON>,
  marker: PhantomData<&'a Block<O, MAX_SIZE, POISON>>,
}

impl<O: Offset, const MAX_SIZE: usize, const POISON: bool> Iterator for BlocksRev<'_, O, MAX_SIZE, POISON> {
  type Item = NonNull<Block<O, MAX_SIZE, POISON>>;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.next?;
    // Safety: see `Blocks::next`.
    self.next = unsafe { Block::prev(block) };
    Some(block)
  }
}

/// Allocator that carves variable-sized allocations out of a single region
/// borrowed for `'a`. All bookkeeping lives in the [`Block`] headers inside
/// the region.
///
/// Not thread safe: wrap it in a lock to share it.
pub struct BlockAllocator<'a, O: Offset = usize, const MAX_SIZE: usize = { usize::MAX }, const POISON: bool = false> {
  first: Link<O, MAX_SIZE, POISON>,
  last: Link<O, MAX_SIZE, POISON>,
  capacity: usize,
  strategy: Strategy,
  threshold: usize,
  region: PhantomData<&'a mut [u8]>,
}

impl<'a, O: Offset, const MAX_SIZE: usize, const POISON: bool> BlockAllocator<'a, O, MAX_SIZE, POISON> {
  pub const fn new(strategy: Strategy) -> Self {
    Self {
      first: None,
      last: None,
      capacity: 0,
      strategy,
      threshold: 0,
      region: PhantomData,
    }
  }

  /// Takes over `region`, which becomes one free block. Fails like
  /// [`Block::init`].
  pub fn init(
    &mut self,
    region: &'a mut [u8],
  ) -> Result<()> {
    let start = region.as_ptr();
    let len = region.len();
    let block = Block::init(region)?;

    // Safety: freshly initialized.
    self.capacity = unsafe { block.as_ref().outer_size() };
    self.first = Some(block);
    self.last = Some(block);

    log::debug!(
      "init {:?} allocator over {:p} ({} of {} bytes usable as blocks)",
      self.strategy,
      start,
      self.capacity,
      len
    );
    Ok(())
  }

  pub fn strategy(&self) -> Strategy {
    self.strategy
  }

  pub fn threshold(&self) -> usize {
    self.threshold
  }

  /// Requests of at least `threshold` bytes are served from the front of the
  /// region by [`Strategy::DualFirstFit`], smaller ones from the back.
  pub fn set_threshold(
    &mut self,
    threshold: usize,
  ) {
    self.threshold = threshold;
  }

  /// Region size managed as blocks; zero before [`BlockAllocator::init`].
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn blocks(&self) -> Blocks<'_, O, MAX_SIZE, POISON> {
    Blocks {
      next: self.first,
      marker: PhantomData,
    }
  }

  pub fn blocks_rev(&self) -> BlocksRev<'_, O, MAX_SIZE, POISON> {
    BlocksRev {
      next: self.last,
      marker: PhantomData,
    }
  }

  /// Returns a pointer to at least `layout.size()` bytes aligned to
  /// `layout.align()`, or `None` if no free block can hold it. A failed
  /// request leaves the region untouched.
  pub fn allocate(
    &mut self,
    layout: Layout,
  ) -> Option<NonNull<u8>> {
    if layout.size() == 0 {
      log::trace!("allocate({layout:?}) -> zero-sized request");
      return None;
    }

    let inner_size = checked_align_up(layout.size(), Block::<O, MAX_SIZE, POISON>::ALIGN)?;
    let alignment = layout.align().max(Block::<O, MAX_SIZE, POISON>::ALIGN);
    let (placement, selection) = self.strategy.plan(layout.size(), self.threshold);

    let Some(block) = self.choose(placement, selection, inner_size, alignment) else {
      log::warn!("allocate({layout:?}) -> no free block fits");
      return None;
    };

    // Safety: `block` comes from our own list and passed the fit check.
    unsafe {
      let result = match placement {
        Placement::First => Block::alloc_first(block, inner_size, alignment),
        Placement::Last => Block::alloc_last(block, inner_size, alignment),
      };

      match result {
        Ok(block) => {
          self.update_last(block);
          let ptr = Block::usable_space(block);
          log::trace!("allocate({layout:?}) -> {ptr:p}");
          Some(ptr)
        }
        Err(err) => {
          log::warn!("allocate({layout:?}) -> {err}");
          None
        }
      }
    }
  }

  /// Releases the allocation at `ptr`, merging it with free neighbours.
  ///
  /// # Safety
  ///
  /// `ptr` must have been returned by [`BlockAllocator::allocate`] on this
  /// allocator and not deallocated since. Use [`BlockAllocator::query`] first
  /// when that is not known.
  pub unsafe fn deallocate(
    &mut self,
    ptr: NonNull<u8>,
  ) {
    unsafe {
      let block = Block::<O, MAX_SIZE, POISON>::from_usable_space(ptr);
      debug_assert!(self.blocks().any(|b| b == block), "{ptr:p} is not a block of this allocator");

      if !block.as_ref().used() {
        log::warn!("deallocate({ptr:p}) -> already free");
        return;
      }

      let block = Block::free(block);
      self.update_last(block);
      log::trace!("deallocate({ptr:p})");
    }
  }

  /// Grows or shrinks the allocation at `ptr` in place. Returns whether it
  /// now holds at least `new_size` bytes; on `false` it is unchanged. A
  /// block that was already freed is never resized.
  ///
  /// # Safety
  ///
  /// Same as [`BlockAllocator::deallocate`].
  pub unsafe fn resize(
    &mut self,
    ptr: NonNull<u8>,
    new_size: usize,
  ) -> bool {
    unsafe {
      let block = Block::<O, MAX_SIZE, POISON>::from_usable_space(ptr);
      debug_assert!(self.blocks().any(|b| b == block), "{ptr:p} is not a block of this allocator");

      if !block.as_ref().used() {
        log::warn!("resize({ptr:p}, {new_size}) -> already free");
        return false;
      }

      let result = Block::resize(block, new_size);
      self.update_last(block);

      let resized = block.as_ref().inner_size() >= new_size;
      match result {
        Ok(()) => log::trace!("resize({ptr:p}, {new_size}) -> {}", block.as_ref().inner_size()),
        Err(err) => log::trace!("resize({ptr:p}, {new_size}) -> {err}"),
      }
      resized
    }
  }

  /// Succeeds if `ptr` is the start of a live allocation that can hold
  /// `layout`. Walks the whole list.
  pub fn query(
    &self,
    ptr: NonNull<u8>,
    layout: Layout,
  ) -> Result<()> {
    if ptr.as_ptr() as usize % layout.align() != 0 {
      return Err(Error::OutOfRange);
    }

    let block = self.find(ptr).ok_or(Error::OutOfRange)?;
    let size = checked_align_up(layout.size(), Block::<O, MAX_SIZE, POISON>::ALIGN).ok_or(Error::OutOfRange)?;

    // Safety: found in our own list.
    let header = unsafe { block.as_ref() };
    if header.used() && size <= header.inner_size() {
      Ok(())
    } else {
      Err(Error::OutOfRange)
    }
  }

  /// Layout actually available at `ptr`, which may be larger than what was
  /// requested.
  pub fn usable_layout(
    &self,
    ptr: NonNull<u8>,
  ) -> Result<Layout> {
    let block = self.find(ptr).ok_or(Error::OutOfRange)?;

    // Safety: found in our own list.
    let header = unsafe { block.as_ref() };
    if !header.used() {
      return Err(Error::FailedPrecondition);
    }
    Layout::from_size_align(header.inner_size(), Block::<O, MAX_SIZE, POISON>::ALIGN).map_err(|_| Error::OutOfRange)
  }

  pub fn stats(&self) -> BlockStats {
    let mut stats = BlockStats {
      capacity: self.capacity,
      ..BlockStats::default()
    };

    for block in self.blocks() {
      // Safety: iterating our own list.
      let header = unsafe { block.as_ref() };
      let inner_size = header.inner_size();
      if header.used() {
        stats.used_blocks += 1;
        stats.used_bytes += inner_size;
      } else {
        stats.free_blocks += 1;
        stats.free_bytes += inner_size;
        stats.largest_free = stats.largest_free.max(inner_size);
      }
    }

    stats
  }

  /// Returns the first block that fails [`Block::status`], if any. Does not
  /// modify anything.
  pub fn validate(&self) -> Option<(NonNull<Block<O, MAX_SIZE, POISON>>, BlockStatus)> {
    self.blocks().find_map(|block| {
      // Safety: iterating our own list.
      let status = unsafe { Block::status(block) };
      (!status.is_valid()).then_some((block, status))
    })
  }

  /// Turns the whole region back into one free block. Outstanding
  /// allocations are lost.
  pub fn reset(&mut self) -> Result<()> {
    let first = self.first.ok_or(Error::FailedPrecondition)?;

    let leaked = self.stats().used_blocks;
    if leaked != 0 {
      log::warn!("reset with {leaked} blocks still in use");
    }

    // Safety: `first` starts the region handed to `init`, which we borrow
    // exclusively for `'a` and which spans `capacity` bytes.
    let region = unsafe { core::slice::from_raw_parts_mut(first.cast::<u8>().as_ptr(), self.capacity) };
    let block = Block::init(region)?;
    self.first = Some(block);
    self.last = Some(block);

    log::debug!("reset {} bytes", self.capacity);
    Ok(())
  }

  fn find(
    &self,
    ptr: NonNull<u8>,
  ) -> Link<O, MAX_SIZE, POISON> {
    // Safety: iterating our own list.
    self.blocks().find(|&block| unsafe { Block::usable_space(block) } == ptr)
  }

  fn choose(
    &self,
    placement: Placement,
    selection: Selection,
    inner_size: usize,
    alignment: usize,
  ) -> Link<O, MAX_SIZE, POISON> {
    // Safety: every candidate comes from our own list.
    match placement {
      Placement::First => select(self.blocks(), selection, |block| unsafe {
        Block::can_alloc_first(block, inner_size, alignment).is_ok()
      }),
      Placement::Last => select(self.blocks_rev(), selection, |block| unsafe {
        Block::can_alloc_last(block, inner_size, alignment).is_ok()
      }),
    }
  }

  /// Keeps the cached tail current after `block` was allocated, freed or
  /// resized. Only `block` and the block right after it can have become the
  /// last one.
  unsafe fn update_last(
    &mut self,
    block: NonNull<Block<O, MAX_SIZE, POISON>>,
  ) {
    unsafe {
      if block.as_ref().last() {
        self.last = Some(block);
      } else if let Some(next) = Block::next(block) {
        if next.as_ref().last() {
          self.last = Some(next);
        }
      }
    }
  }
}

/// Scans `blocks` once and returns the candidate `selection` prefers among
/// those `fits` accepts. `fits` is expected to reject used blocks.
fn select<O: Offset, const MAX_SIZE: usize, const POISON: bool>(
  blocks: impl Iterator<Item = NonNull<Block<O, MAX_SIZE, POISON>>>,
  selection: Selection,
  fits: impl Fn(NonNull<Block<O, MAX_SIZE, POISON>>) -> bool,
) -> Link<O, MAX_SIZE, POISON> {
  let mut chosen: Option<(NonNull<Block<O, MAX_SIZE, POISON>>, usize)> = None;

  for block in blocks {
    if !fits(block) {
      continue;
    }

    // Safety: `fits` already dereferenced it.
    let size = unsafe { block.as_ref().inner_size() };
    let better = match (selection, chosen) {
      (Selection::FirstFound, _) => return Some(block),
      (_, None) => true,
      (Selection::Smallest, Some((_, best))) => size < best,
      (Selection::Largest, Some((_, best))) => size > best,
    };

    if better {
      chosen = Some((block, size));
    }
  }

  chosen.map(|(block, _)| block)
}
