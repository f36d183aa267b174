//! Property-based tests for the memory manager
//!
//! Random allocation sequences, fork/exit pairs and copy-on-write writes,
//! checked against a simple model of who should see which bytes.


use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use proptest_strategies::*;
use vmcore::mm::layout::{task_base, BLOCK_SIZE, LOW_MEM, TASK_SIZE};
use vmcore::mm::page_alloc::FrameAllocator;
use vmcore::mm::{FaultResolution, FrameId, MemoryLayout, MemoryManager, VirtAddr, PAGE_SIZE};
use vmcore::FatalMemoryError;

fn manager(pool_pages: u32) -> MemoryManager {
    let layout =
        MemoryLayout::new(LOW_MEM, LOW_MEM, LOW_MEM + pool_pages * PAGE_SIZE as u32).unwrap();
    MemoryManager::new(layout)
}

fn page_addr(task: u32, page: u32) -> VirtAddr {
    VirtAddr(task_base(task).0 + page * PAGE_SIZE as u32)
}

// ════════════════════════════════════════════════════════════
// Frame Pool
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Counts track the model exactly and frames come back once per
    /// drop to zero
    #[test]
    fn pool_counts_match_model(ops in prop::collection::vec(pool_op(), 1..200)) {
        let layout = MemoryLayout::new(LOW_MEM, LOW_MEM, LOW_MEM + 16 * PAGE_SIZE as u32).unwrap();
        let mut pool = FrameAllocator::new(&layout);
        let mut held: Vec<FrameId> = Vec::new();
        let mut counts: BTreeMap<FrameId, u16> = BTreeMap::new();
        let mut zero_crossings = 0u64;

        for op in ops {
            match op {
                PoolOp::Alloc => match pool.alloc() {
                    Some(frame) => {
                        prop_assert!(!layout.is_reserved(frame));
                        prop_assert_eq!(counts.get(&frame).copied().unwrap_or(0), 0);
                        counts.insert(frame, 1);
                        held.push(frame);
                    }
                    None => {
                        prop_assert_eq!(pool.free_count(), 0);
                    }
                },
                PoolOp::Free(n) if !held.is_empty() => {
                    let frame = held.swap_remove(n % held.len());
                    pool.free(frame).unwrap();
                    let count = counts.get_mut(&frame).unwrap();
                    *count -= 1;
                    if *count == 0 {
                        zero_crossings += 1;
                    }
                }
                PoolOp::Share(n) if !held.is_empty() => {
                    let frame = held[n % held.len()];
                    pool.share(frame).unwrap();
                    *counts.get_mut(&frame).unwrap() += 1;
                    held.push(frame);
                }
                _ => {}
            }
        }

        for (frame, count) in &counts {
            prop_assert_eq!(pool.count(*frame), Some(*count));
        }
        let free = 16 - counts.values().filter(|&&c| c > 0).count() as u32;
        prop_assert_eq!(pool.free_count(), free);
        prop_assert_eq!(pool.stats().frees, zero_crossings);
    }

    /// Freeing a frame that is already free is always caught
    #[test]
    fn double_free_is_fatal(extra in 1usize..4) {
        let layout = MemoryLayout::new(LOW_MEM, LOW_MEM, LOW_MEM + 4 * PAGE_SIZE as u32).unwrap();
        let mut pool = FrameAllocator::new(&layout);
        let frame = pool.alloc().unwrap();
        for _ in 0..extra {
            pool.share(frame).unwrap();
        }
        for _ in 0..=extra {
            pool.free(frame).unwrap();
        }
        prop_assert_eq!(pool.free(frame), Err(FatalMemoryError::DoubleFree(frame)));
    }
}

// ════════════════════════════════════════════════════════════
// Duplicate / Release
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every shared frame is counted once per mapping space, and releasing
    /// the copy restores every count
    #[test]
    fn duplicate_then_release_restores_counts(pages in page_set(3 * 1024)) {
        let mut mm = manager(64);
        let parent = task_base(1);
        let child = task_base(2);
        let mut frames = Vec::new();
        for &page in &pages {
            let frame = mm.allocate_frame().unwrap();
            mm.map_one(frame, page_addr(1, page), true).unwrap();
            frames.push(frame);
        }
        let before: Vec<_> = frames.iter().map(|&f| mm.ref_count(f)).collect();
        let free_before = mm.frame_stats().free;

        mm.duplicate(parent, child, 3 * BLOCK_SIZE).unwrap();
        for (&page, &frame) in pages.iter().zip(&frames) {
            prop_assert_eq!(mm.ref_count(frame), Some(2));
            let p = mm.lookup(page_addr(1, page)).unwrap();
            let c = mm.lookup(page_addr(2, page)).unwrap();
            prop_assert_eq!(p.frame(), frame);
            prop_assert_eq!(c.frame(), frame);
            prop_assert!(!p.is_writable() && !c.is_writable());
        }
        mm.check_invariants().unwrap();

        mm.release(child, 3 * BLOCK_SIZE).unwrap();
        let after: Vec<_> = frames.iter().map(|&f| mm.ref_count(f)).collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(mm.frame_stats().free, free_before);
        mm.check_invariants().unwrap();
    }

    /// A child's writes never show through the parent's mappings
    #[test]
    fn child_writes_are_isolated(
        seed in prop::collection::vec(any::<u8>(), 4),
        child_writes in writes(4),
    ) {
        let mut mm = manager(32);
        for (page, &byte) in seed.iter().enumerate() {
            mm.write_user(page_addr(1, page as u32), &[byte; 64]).unwrap();
        }
        mm.duplicate(task_base(1), task_base(2), BLOCK_SIZE).unwrap();

        let mut child_model: BTreeMap<(u32, u32), u8> = BTreeMap::new();
        for &(page, offset, value) in &child_writes {
            let addr = VirtAddr(page_addr(2, page).0 + offset);
            mm.write_user(addr, &[value]).unwrap();
            child_model.insert((page, offset), value);
        }

        for (page, &byte) in seed.iter().enumerate() {
            let mut buf = [0u8; 64];
            mm.read_user(page_addr(1, page as u32), &mut buf).unwrap();
            prop_assert_eq!(buf, [byte; 64]);
        }
        for (&(page, offset), &value) in &child_model {
            let mut buf = [0u8; 1];
            mm.read_user(VirtAddr(page_addr(2, page).0 + offset), &mut buf).unwrap();
            prop_assert_eq!(buf[0], value);
        }
        mm.check_invariants().unwrap();
    }

    /// Demand-zero pages are zero even when the frame was dirty before
    #[test]
    fn no_page_fault_yields_zeroed_frame(dirty in prop::collection::vec(any::<u8>(), 1..64)) {
        let mut mm = manager(8);
        let frame = mm.allocate_frame().unwrap();
        for (i, &byte) in dirty.iter().enumerate() {
            mm.phys_mut().write_byte(vmcore::mm::PhysAddr(frame.addr().0 + i as u32), byte).unwrap();
        }
        mm.free_frame(frame).unwrap();

        let res = mm.do_no_page(task_base(1)).unwrap();
        let FaultResolution::ZeroFilled(fresh) = res else {
            panic!("expected zero fill, got {:?}", res);
        };
        prop_assert_eq!(mm.phys().is_zeroed(fresh), Ok(true));
    }
}

// ════════════════════════════════════════════════════════════
// Fork / Write / Exit Workloads
// ════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Interleaved forks, writes and exits keep every count consistent,
    /// every task sees only its own writes, and tearing everything down
    /// empties the pool
    #[test]
    fn workloads_keep_counts_and_contents(ops in prop::collection::vec(task_op(), 1..40)) {
        let pool = TASK_SLOTS * (PAGES_PER_TASK + 1) + 4;
        let mut mm = manager(pool);
        let mut alive: BTreeSet<u32> = BTreeSet::from([1]);
        let mut model: BTreeMap<(u32, u32), u8> = BTreeMap::new();

        for op in ops {
            match op {
                TaskOp::Write { task, page, value } if alive.contains(&task) => {
                    let addr = VirtAddr(page_addr(task, page).0 + page);
                    mm.write_user(addr, &[value]).unwrap();
                    model.insert((task, page), value);
                }
                TaskOp::Fork { parent, child }
                    if alive.contains(&parent) && !alive.contains(&child) =>
                {
                    mm.copy_mem(task_base(parent), task_base(child), TASK_SIZE).unwrap();
                    alive.insert(child);
                    let inherited: Vec<_> = model
                        .iter()
                        .filter(|((task, _), _)| *task == parent)
                        .map(|(&(_, page), &value)| (page, value))
                        .collect();
                    for (page, value) in inherited {
                        model.insert((child, page), value);
                    }
                }
                TaskOp::Exit { task } if alive.contains(&task) => {
                    mm.release(task_base(task), TASK_SIZE).unwrap();
                    alive.remove(&task);
                    model.retain(|(owner, _), _| *owner != task);
                }
                _ => continue,
            }
            mm.check_invariants().unwrap();
        }

        for (&(task, page), &value) in &model {
            let mut buf = [0u8; 1];
            let addr = VirtAddr(page_addr(task, page).0 + page);
            mm.read_user(addr, &mut buf).unwrap();
            prop_assert_eq!(buf[0], value);
        }

        for task in alive {
            mm.release(task_base(task), TASK_SIZE).unwrap();
        }
        prop_assert_eq!(mm.frame_stats().free, pool);
        prop_assert_eq!(mm.frame_stats().shared, 0);
    }
}
