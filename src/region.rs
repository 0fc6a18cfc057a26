use core::{ptr, ptr::NonNull, slice};

use libc::{MAP_ANONYMOUS, MAP_FAILED, MAP_PRIVATE, PROT_READ, PROT_WRITE, c_void, mmap, munmap};

use crate::error::{Error, Result};

/// Page-aligned, zero-filled memory obtained straight from the kernel, for
/// when no static buffer is at hand. Unmapped on drop.
///
/// ```text
///   mmap(len)                                           munmap on drop
///   ┌──────────────────────────────────────────────────────────────┐
///   │                    MmapRegion::as_mut_slice                  │
///   └──────────────────────────────────────────────────────────────┘
///   ▲
///   └── page aligned, so any block header alignment is satisfied
/// ```
pub struct MmapRegion {
  ptr: NonNull<u8>,
  len: usize,
}

impl MmapRegion {
  pub fn map(len: usize) -> Result<Self> {
    if len == 0 {
      return Err(Error::ResourceExhausted);
    }

    // Safety: anonymous private mapping, no file descriptor involved.
    let address = unsafe {
      mmap(
        ptr::null_mut(),
        len,
        PROT_READ | PROT_WRITE,
        MAP_PRIVATE | MAP_ANONYMOUS,
        -1,
        0,
      )
    };

    if address == MAP_FAILED {
      log::warn!("mmap of {len} bytes failed");
      return Err(Error::ResourceExhausted);
    }

    let ptr = NonNull::new(address.cast::<u8>()).ok_or(Error::ResourceExhausted)?;
    log::debug!("mapped {len} bytes at {ptr:p}");

    Ok(Self { ptr, len })
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    // Safety: we own the mapping for as long as `self` lives.
    unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
  }
}

impl Drop for MmapRegion {
  fn drop(&mut self) {
    // Safety: `ptr` and `len` describe exactly the mapping made in `map`.
    let result = unsafe { munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) };
    if result != 0 {
      log::warn!("munmap of {} bytes at {:p} failed", self.len, self.ptr);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{BlockAllocator, Strategy};
  use core::alloc::Layout;

  #[test]
  fn test_map_is_page_aligned_and_zeroed() {
    let mut region = MmapRegion::map(4096).unwrap();

    assert_eq!(region.len(), 4096);
    assert!(!region.is_empty());

    let bytes = region.as_mut_slice();
    assert_eq!(bytes.as_ptr() as usize % 4096, 0);
    assert!(bytes.iter().all(|&b| b == 0));
  }

  #[test]
  fn test_map_zero_bytes_fails() {
    assert_eq!(MmapRegion::map(0).err(), Some(Error::ResourceExhausted));
  }

  #[test]
  fn test_allocator_over_mapped_region() {
    let mut region = MmapRegion::map(64 * 1024).unwrap();
    let mut allocator = BlockAllocator::<usize>::new(Strategy::BestFit);
    allocator.init(region.as_mut_slice()).unwrap();

    let layout = Layout::from_size_align(4096, 4096).unwrap();
    let page = allocator.allocate(layout).unwrap();
    assert_eq!(page.as_ptr() as usize % 4096, 0);

    unsafe {
      core::ptr::write_bytes(page.as_ptr(), 0x5A, 4096);
      allocator.deallocate(page);
    }

    let stats = allocator.stats();
    assert_eq!(stats.used_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.capacity, 64 * 1024);
  }
}
