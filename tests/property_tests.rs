//! Property-based tests for the free-space bookkeeping.
//!
//! Uses proptest to drive random allocate/release sequences and checks the
//! layout invariants after every step.

use proptest::prelude::*;
use qen_heap::{
    FreeSpaceTracker, SuballocationKind, VirtualAllocationDesc, VirtualBlock, VirtualBlockDesc, ZeroRange,
};

#[derive(Clone, Debug)]
enum Op {
    Alloc { size: u64, alignment: u64 },
    /// Index into the live allocations, modulo their count.
    Free(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u64..=512, 0u32..=8).prop_map(|(size, shift)| Op::Alloc { size, alignment: 1 << shift }),
        2 => any::<usize>().prop_map(Op::Free),
    ]
}

/// Live `(offset, size)` pairs are disjoint, aligned, inside the margins,
/// and account for exactly the bytes the tracker reports as used.
fn check_layout(t: &FreeSpaceTracker, live: &[(u64, u64, u64)]) -> Result<(), TestCaseError> {
    prop_assert_eq!(t.validate(), Ok(()));
    prop_assert_eq!(t.allocation_count(), live.len());

    let used: u64 = live.iter().map(|&(_, size, _)| size).sum();
    prop_assert_eq!(t.sum_free_size(), t.size() - used);

    let mut sorted: Vec<_> = live.to_vec();
    sorted.sort_unstable();
    for &(offset, size, alignment) in &sorted {
        prop_assert_eq!(offset % alignment, 0);
        prop_assert!(offset >= t.margin());
        prop_assert!(offset + size + t.margin() <= t.size());
    }
    for pair in sorted.windows(2) {
        let (a_off, a_size, _) = pair[0];
        let (b_off, _, _) = pair[1];
        prop_assert!(a_off + a_size + t.margin() <= b_off, "overlap or missing margin: {:?}", pair);
    }

    // The sequence tiles the heap.
    let mut cursor = 0;
    for sub in t.iter() {
        prop_assert_eq!(sub.offset, cursor);
        cursor += sub.size;
    }
    prop_assert_eq!(cursor, t.size());
    Ok(())
}

proptest! {
    /// Every step of a random workload leaves a consistent layout.
    #[test]
    fn tracker_random_workload(
        heap_kb in 1u64..=16,
        margin in prop_oneof![Just(0u64), Just(16u64)],
        ops in prop::collection::vec(op(), 1..200),
    ) {
        let mut t = FreeSpaceTracker::new(heap_kb * 1024, margin);
        let mut live: Vec<(u64, u64, u64)> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc { size, alignment } => {
                    if let Some(req) = t.search(size, alignment) {
                        t.commit(&req, size, 0);
                        live.push((req.offset, size, alignment));
                    }
                }
                Op::Free(i) if !live.is_empty() => {
                    let (offset, _, _) = live.swap_remove(i % live.len());
                    t.release(offset);
                }
                Op::Free(_) => {}
            }
            check_layout(&t, &live)?;
        }

        for (offset, _, _) in live.drain(..) {
            t.release(offset);
        }
        prop_assert!(t.is_empty());
        prop_assert_eq!(t.free_count(), 1);
        prop_assert_eq!(t.sum_free_size(), t.size());
    }

    /// Without margin or alignment, a search fails only when no free range
    /// is large enough.
    #[test]
    fn tracker_search_fails_only_without_room(
        sizes in prop::collection::vec(16u64..=256, 1..64),
        frees in prop::collection::vec(any::<bool>(), 64),
        request in 16u64..=1024,
    ) {
        let mut t = FreeSpaceTracker::new(4096, 0);
        let mut placed = Vec::new();
        for size in sizes {
            if let Some(req) = t.search(size, 1) {
                t.commit(&req, size, 0);
                placed.push(req.offset);
            }
        }
        for (offset, free) in placed.iter().zip(frees) {
            if free {
                t.release(*offset);
            }
        }

        let largest_free = t
            .iter()
            .filter(|s| s.kind == SuballocationKind::Free)
            .map(|s| s.size)
            .max()
            .unwrap_or(0);
        prop_assert_eq!(t.search(request, 1).is_some(), largest_free >= request);
    }

    /// A range reported zero never overlaps anything marked used.
    #[test]
    fn zero_range_never_reports_used_bytes(
        marks in prop::collection::vec((0u64..1000, 1u64..200), 1..20),
        query in (0u64..1000, 1u64..200),
    ) {
        let mut zr = ZeroRange::new(1200);
        for &(begin, len) in &marks {
            zr.mark_used(begin, begin + len);
        }
        let (begin, len) = query;
        if zr.is_zero(begin, begin + len) {
            for &(used_begin, used_len) in &marks {
                let disjoint = begin + len <= used_begin || used_begin + used_len <= begin;
                prop_assert!(disjoint);
            }
        }
    }

    /// Virtual blocks return to empty once everything is freed, in any order.
    #[test]
    fn virtual_block_round_trip(
        sizes in prop::collection::vec((1u64..=300, 0u32..=6), 1..40),
        order in any::<u64>(),
    ) {
        let vb = VirtualBlock::new(&VirtualBlockDesc {
            size: 8192,
            ..VirtualBlockDesc::default()
        })
        .unwrap();
        let mut handles = Vec::new();
        for (size, shift) in sizes {
            let desc = VirtualAllocationDesc { size, alignment: 1 << shift, user_data: size };
            if let Ok(a) = vb.allocate(&desc) {
                let info = vb.info(a).unwrap();
                prop_assert_eq!(info.size, size);
                prop_assert_eq!(info.user_data, size);
                handles.push(a);
            }
        }

        let mut seed = order;
        while !handles.is_empty() {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let idx = usize::try_from(seed >> 33).unwrap() % handles.len();
            vb.free(handles.swap_remove(idx));
            prop_assert_eq!(vb.validate(), Ok(()));
        }
        prop_assert!(vb.is_empty());
        prop_assert_eq!(vb.sum_free_size(), vb.size());
    }
}
