use std::{alloc::Layout, ptr, ptr::NonNull};

use rblock::{BlockAllocator, MmapRegion, Strategy};
use simple_logger::SimpleLogger;

type DemoAllocator<'a> = BlockAllocator<'a, u32, { usize::MAX }, true>;

/// Prints every block of the region, lowest address first.
fn print_blocks(allocator: &DemoAllocator<'_>) {
  for block in allocator.blocks() {
    // Safety: the iterator only yields blocks of this allocator.
    let header = unsafe { block.as_ref() };
    println!(
      "    {:p}  outer = {:>6}  inner = {:>6}  {}{}",
      block,
      header.outer_size(),
      header.inner_size(),
      if header.used() { "used" } else { "free" },
      if header.last() { "  (last)" } else { "" },
    );
  }
}

fn print_alloc(
  layout: Layout,
  ptr: Option<NonNull<u8>>,
) {
  match ptr {
    Some(ptr) => println!(
      "    {} bytes aligned to {} -> {:p} (addr % align = {})",
      layout.size(),
      layout.align(),
      ptr,
      ptr.as_ptr() as usize % layout.align()
    ),
    None => println!("    {} bytes aligned to {} -> no fit", layout.size(), layout.align()),
  }
}

/// Carves the same fragmented region for `strategy` and shows where a 128
/// byte request lands.
fn show_strategy(strategy: Strategy) {
  let mut region = MmapRegion::map(4096).unwrap();
  let mut allocator = DemoAllocator::new(strategy);
  allocator.set_threshold(128);
  allocator.init(region.as_mut_slice()).unwrap();

  let sizes = [256, 64, 128, 64, 192, 64];
  let ptrs: Vec<_> = sizes
    .iter()
    .map(|&size| allocator.allocate(Layout::from_size_align(size, 8).unwrap()).unwrap())
    .collect();

  // Free the 256, 128 and 192 byte allocations to leave holes.
  unsafe {
    allocator.deallocate(ptrs[0]);
    allocator.deallocate(ptrs[2]);
    allocator.deallocate(ptrs[4]);
  }

  println!("\n  {strategy:?}:");
  let layout = Layout::from_size_align(128, 8).unwrap();
  print_alloc(layout, allocator.allocate(layout));
  print_blocks(&allocator);
}

fn main() {
  SimpleLogger::new().with_level(log::LevelFilter::Trace).init().unwrap();

  let mut region = MmapRegion::map(64 * 1024).unwrap();
  let mut allocator = DemoAllocator::new(Strategy::FirstFit);
  allocator.init(region.as_mut_slice()).unwrap();

  println!("[0] Fresh region");
  print_blocks(&allocator);

  unsafe {
    // --------------------------------------------------------------------
    // 1) Allocate space for a u32 and write to it.
    // --------------------------------------------------------------------
    let layout_u32 = Layout::new::<u32>();
    let first = allocator.allocate(layout_u32).unwrap();
    println!("\n[1] Allocate u32");
    print_alloc(layout_u32, Some(first));

    first.cast::<u32>().write(0xDEADBEEF);
    println!("[1] Value written = 0x{:X}", first.cast::<u32>().read());

    // --------------------------------------------------------------------
    // 2) Allocate a page-aligned buffer. The padding in front of it becomes
    //    a free block of its own.
    // --------------------------------------------------------------------
    let layout_page = Layout::from_size_align(4096, 4096).unwrap();
    let page = allocator.allocate(layout_page).unwrap();
    println!("\n[2] Allocate 4 KiB aligned to 4 KiB");
    print_alloc(layout_page, Some(page));
    ptr::write_bytes(page.as_ptr(), 0xAB, layout_page.size());
    print_blocks(&allocator);

    // --------------------------------------------------------------------
    // 3) Grow the u32 in place, then ask what it can hold now.
    // --------------------------------------------------------------------
    let grown = allocator.resize(first, 64);
    println!("\n[3] Resize u32 allocation to 64 bytes -> {grown}");
    println!("[3] Usable layout = {:?}", allocator.usable_layout(first));
    println!(
      "[3] query(64 bytes) = {:?}, query(8192 bytes) = {:?}",
      allocator.query(first, Layout::from_size_align(64, 4).unwrap()),
      allocator.query(first, Layout::from_size_align(8192, 4).unwrap()),
    );

    // --------------------------------------------------------------------
    // 4) Free everything and watch the region merge back into one block.
    // --------------------------------------------------------------------
    allocator.deallocate(page);
    allocator.deallocate(first);
    println!("\n[4] After freeing both allocations");
    print_blocks(&allocator);
    println!("[4] {:?}", allocator.stats());
  }

  // ------------------------------------------------------------------------
  // 5) Same holes, different strategies.
  // ------------------------------------------------------------------------
  println!("\n[5] Where a 128 byte request lands");
  for strategy in [
    Strategy::FirstFit,
    Strategy::LastFit,
    Strategy::BestFit,
    Strategy::WorstFit,
    Strategy::DualFirstFit,
  ] {
    show_strategy(strategy);
  }

  // ------------------------------------------------------------------------
  // 6) Poisoned blocks catch writes past the end of an allocation.
  // ------------------------------------------------------------------------
  let overrun = allocator.allocate(Layout::from_size_align(16, 8).unwrap()).unwrap();
  unsafe {
    let usable = allocator.usable_layout(overrun).unwrap().size();
    overrun.as_ptr().add(usable).write(0xFF);
  }
  println!("\n[6] After writing one byte past the end: {:?}", allocator.validate().map(|(_, status)| status));

  println!("\n[7] End of example. The region is unmapped when it goes out of scope.");
}
