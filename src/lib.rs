//! # rblock - Intrusive Block Allocator
//!
//! This crate carves variable-sized allocations out of a caller-provided
//! memory region. Every piece of bookkeeping lives inside the region itself,
//! in a small header in front of each block, so the allocator needs no heap
//! of its own and works under `no_std`.
//!
//! ## Overview
//!
//! A region is a contiguous run of blocks. Each header records how far back
//! the previous header is and how far ahead the next one is, which makes the
//! region a doubly linked list that is walked purely by pointer arithmetic:
//!
//! ```text
//!   Region:
//!
//!   ┌────────┬──────────────┬────────┬──────┬────────┬──────────────────┐
//!   │ header │   used (A)   │ header │ free │ header │   used (B), last │
//!   └────────┴──────────────┴────────┴──────┴────────┴──────────────────┘
//!   ▲                       ▲                ▲
//!   │◄──── next offset ────►│◄─ next offset ►│
//!   │◄──── prev offset ─────│◄─ prev offset ─│
//!   │
//!   └── region start, first block has prev offset 0
//! ```
//!
//! ## Block Header
//!
//! A header is two packed fields of the offset type `O` (`u8` to `usize`).
//! Offsets are counted in units of the header alignment:
//!
//! ```text
//!   prev field:  ┌──────┬──────────────┬─────────────────────────────┐
//!                │ used │ custom flags │  offset to previous header  │
//!                └──────┴──────────────┴─────────────────────────────┘
//!   next field:  ┌──────┬──────────────┬─────────────────────────────┐
//!                │ last │ custom flags │  offset to next header      │
//!                └──────┴──────────────┴─────────────────────────────┘
//! ```
//!
//! With poisoning enabled, a guard pattern sits on each side of the usable
//! space and is checked whenever the block's validity is:
//!
//! ```text
//!   ┌────────┬───────┬─────────────────────────────┬───────┐
//!   │ header │ guard │        usable space         │ guard │
//!   └────────┴───────┴─────────────────────────────┴───────┘
//!                    ▲
//!                    └── pointer returned by allocate
//! ```
//!
//! ## Strategies
//!
//! ```text
//!   free blocks:      [ 256 ]  [ 128 ]  [ 192 ]           request: 128
//!
//!   FirstFit      ->  [ 256 ]  lowest address that fits, carved from the front
//!   LastFit       ->  [ 192 ]  highest address that fits, carved from the back
//!   BestFit       ->  [ 128 ]  smallest block that fits
//!   WorstFit      ->  [ 256 ]  largest block that fits
//!   DualFirstFit  ->  FirstFit at or above the threshold, LastFit below it
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rblock
//!   ├── align      - Alignment macros (align_up!, align_down!)
//!   ├── field      - Packed offset + flags header words
//!   ├── block      - Block header and its split/merge/alloc/resize operations
//!   ├── allocator  - BlockAllocator and its placement strategies
//!   ├── region     - mmap-backed regions (unix only)
//!   └── error      - Error type shared by every fallible operation
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use core::alloc::Layout;
//! use rblock::{BlockAllocator, MmapRegion, Strategy};
//!
//! fn main() {
//!     let mut region = MmapRegion::map(64 * 1024).unwrap();
//!     let mut allocator = BlockAllocator::<u32>::new(Strategy::BestFit);
//!     allocator.init(region.as_mut_slice()).unwrap();
//!
//!     let layout = Layout::new::<u64>();
//!     let ptr = allocator.allocate(layout).unwrap();
//!
//!     unsafe {
//!         ptr.cast::<u64>().write(42);
//!         allocator.deallocate(ptr);
//!     }
//! }
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Single region**: The allocator never grows beyond the region it was given
//! - **Linear search**: Every strategy walks the block list
//!
//! ## Safety
//!
//! Block handles are raw pointers into the region. Navigation and mutation
//! through them is `unsafe`; [`BlockAllocator`] wraps those operations and only
//! leaves `deallocate` and `resize` unsafe, since they trust the caller's
//! pointer.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod align;
mod allocator;
mod block;
mod error;
mod field;
#[cfg(unix)]
mod region;

pub use allocator::{BlockAllocator, BlockStats, Blocks, BlocksRev, Strategy};
pub use block::{Block, BlockStatus, POISON_PATTERN};
pub use error::{Error, Result};
pub use field::{Field, FieldLayout, MAX_CUSTOM_BITS_PER_FIELD, Offset};
#[cfg(unix)]
pub use region::MmapRegion;
