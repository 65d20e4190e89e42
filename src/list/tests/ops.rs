use super::*;

#[test]
fn push_front_is_lifo() {
    let _trace = trace_init();
    let list = List::<Entry>::new();
    assert!(list.is_empty());

    list.push_front(entry(1));
    list.push_front(entry(2));
    list.push_front(entry(3));
    assert!(!list.is_empty());
    list.assert_valid();

    assert_eq!(list.pop_front().unwrap().val, 3);
    assert_eq!(list.pop_front().unwrap().val, 2);
    assert_eq!(list.pop_front().unwrap().val, 1);
    assert!(list.pop_front().is_none());
    assert!(list.is_empty());
    list.assert_valid();
}

#[test]
fn push_back_is_fifo() {
    let _trace = trace_init();
    let list = List::<Entry>::new();

    list.push_back(entry(1));
    list.push_back(entry(2));
    list.push_back(entry(3));
    list.assert_valid();

    assert_eq!(list.pop_front().unwrap().val, 1);
    assert_eq!(list.pop_front().unwrap().val, 2);
    assert_eq!(list.pop_front().unwrap().val, 3);
    assert!(list.pop_front().is_none());
    list.assert_valid();
}

#[test]
fn walk_both_ways() {
    let _trace = trace_init();
    let list = List::<Entry>::new();
    for i in 1..=3 {
        list.push_back(entry(i));
    }

    assert_eq!(collect_vals(&list), &[1, 2, 3]);
    assert_eq!(collect_vals_rev(&list), &[3, 2, 1]);
    list.assert_valid();
}

#[test]
fn pop_empty() {
    let list = List::<Entry>::new();
    assert!(list.pop_front().is_none());
    assert!(list.is_empty());
    list.assert_valid();
}

#[test]
fn static_head() {
    static HEAD: Links<Entry> = Links::new();
    // Safety: `HEAD` heads no other list.
    static LIST: List<Entry> = unsafe { List::with_static_head(&HEAD) };

    assert!(LIST.is_empty());
    LIST.push_back(entry(1));
    LIST.push_back(entry(2));
    LIST.assert_valid();
    assert_eq!(LIST.pop_front().unwrap().val, 1);
    assert_eq!(LIST.pop_front().unwrap().val, 2);
    assert!(LIST.pop_front().is_none());
    assert!(LIST.is_empty());
    LIST.assert_valid();
}

#[test]
fn remove_middle() {
    let _trace = trace_init();
    let list = List::<Entry>::new();
    let b = entry(2);
    let b_ptr = entry_ptr(&b);

    list.push_back(entry(1));
    list.push_back(b);
    list.push_back(entry(3));

    let removed = unsafe { list.remove(b_ptr) }.expect("b was in the list");
    assert_eq!(removed.val, 2);
    assert!(!removed.links.is_linked());
    assert_eq!(collect_vals(&list), &[1, 3]);
    list.assert_valid();

    // a second removal of the same element is a no-op.
    assert!(unsafe { list.remove(b_ptr) }.is_none());
    assert_eq!(collect_vals(&list), &[1, 3]);
    list.assert_valid();
}

#[test]
fn remove_only_element() {
    let list = List::<Entry>::new();
    let a = entry(1);
    let a_ptr = entry_ptr(&a);
    list.push_back(a);

    let removed = unsafe { list.remove(a_ptr) }.expect("a was in the list");
    assert_eq!(removed.val, 1);
    assert!(list.is_empty());
    list.assert_valid();
}

#[test]
fn push_then_remove_restores() {
    let list = List::<Entry>::new();
    list.push_back(entry(1));
    list.push_back(entry(2));

    let n = entry(3);
    let n_ptr = entry_ptr(&n);
    list.push_back(n);
    let n = unsafe { list.remove(n_ptr) }.unwrap();
    assert!(!n.links.is_linked());
    assert_eq!(collect_vals(&list), &[1, 2]);
    list.assert_valid();
}

#[test]
fn take_all_chain() {
    let _trace = trace_init();
    let mut list = List::<Entry>::new();
    let c = entry(3);
    let c_ptr = entry_ptr(&c);
    list.push_back(entry(1));
    list.push_back(entry(2));
    list.push_back(c);

    let mut drain = list.take_all();
    assert!(list.is_empty());
    list.assert_valid();

    // the detached chain is linear: its first element points back at the
    // last, and the last's forward word is the null terminator.
    unsafe {
        let first = NonNull::new(drain.next).expect("the chain is non-empty");
        assert_eq!(
            or_self(first, links(first).prev.load(Acquire)),
            Entry::links(c_ptr),
        );
        assert!(links(Entry::links(c_ptr)).next.load(Acquire).is_null());
    }

    assert_eq!(drain.next().unwrap().val, 1);
    assert_eq!(drain.next().unwrap().val, 2);
    assert_eq!(drain.next().unwrap().val, 3);
    assert!(drain.next().is_none());

    // elements pushed after the detach are unaffected by it.
    list.push_back(entry(4));
    assert_eq!(collect_vals(&list), &[4]);
}

#[test]
fn take_all_empty() {
    let mut list = List::<Entry>::new();
    assert!(list.take_all().next().is_none());
    assert!(list.is_empty());
    list.assert_valid();
}

#[test]
fn take_all_one() {
    let mut list = List::<Entry>::new();
    list.push_back(entry(1));

    let mut drain = list.take_all();
    let first = drain.next().unwrap();
    assert_eq!(first.val, 1);
    assert!(!first.links.is_linked());
    assert!(drain.next().is_none());
    assert!(list.is_empty());
}

#[test]
fn take_all_unconsumed_drops() {
    let mut list = List::<Shared>::new();
    let entries: Vec<_> = (0..4).map(|i| Arc::new(shared_unpinned(i))).collect();
    for e in &entries {
        // Safety: the `Arc`'d entry is never moved out of.
        list.try_push_back(unsafe { Pin::new_unchecked(e.clone()) })
            .ok()
            .expect("all entries are unlinked");
    }
    for e in &entries {
        assert_eq!(Arc::strong_count(e), 2);
    }

    drop(list.take_all());

    // the drain dropped the list's handles.
    for e in &entries {
        assert_eq!(Arc::strong_count(e), 1);
        assert!(!e.links.is_linked());
    }
    assert!(list.is_empty());
}

#[test]
fn try_push_unlinked_succeeds() {
    let list = List::<Shared>::new();
    let a = shared(1);
    assert!(list.try_push_front(a).is_ok());
    assert_eq!(list.pop_front().unwrap().val, 1);
}

#[test]
fn try_push_linked_fails() {
    let _trace = trace_init();
    let list_a = List::<Shared>::new();
    let list_b = List::<Shared>::new();
    let e = shared(1);

    assert!(list_a.try_push_front(e.clone()).is_ok());
    assert!(e.links.is_linked());

    // the element is in `list_a`; neither pushing it there again nor into
    // `list_b` may succeed or change anything.
    let back = list_a.try_push_front(e.clone()).unwrap_err();
    assert_eq!(back.val, 1);
    let back = list_b.try_push_back(e.clone()).unwrap_err();
    assert_eq!(back.val, 1);
    assert!(list_b.is_empty());
    list_a.assert_valid();
    list_b.assert_valid();

    // once it has been popped back out, it can be pushed again.
    let popped = list_a.pop_front().unwrap();
    assert!(!popped.links.is_linked());
    assert!(list_b.try_push_back(popped).is_ok());
    assert_eq!(list_b.pop_front().unwrap().val, 1);
}

#[test]
fn gap_close_restores() {
    let list = List::<Entry>::new();
    let b = entry(2);
    let b_ptr = entry_ptr(&b);
    list.push_back(entry(1));
    list.push_back(b);
    list.push_back(entry(3));

    list.front_gap().close();
    list.back_gap().close();
    unsafe { Gap::after(b_ptr) }.close();
    drop(unsafe { Gap::before(b_ptr) });
    assert_eq!(collect_vals(&list), &[1, 2, 3]);
    list.assert_valid();
}

#[test]
fn gap_insert() {
    let list = List::<Entry>::new();
    let a = entry(1);
    let a_ptr = entry_ptr(&a);
    list.push_back(a);
    list.push_back(entry(3));

    // a gap is a position: inserting into it is insertion at that
    // position.
    unsafe { Gap::after(a_ptr) }.insert(entry(2));
    list.front_gap().insert(entry(0));
    list.back_gap().insert(entry(4));
    assert_eq!(collect_vals(&list), &[0, 1, 2, 3, 4]);
    list.assert_valid();
}

#[test]
fn cut_splice_identity() {
    let list = List::<Entry>::new();
    let b = entry(2);
    let b_ptr = entry_ptr(&b);
    list.push_back(entry(1));
    list.push_back(b);
    list.push_back(entry(3));

    let (iso, gap) = unsafe { Isolated::cut(b_ptr) };
    assert_eq!(iso.as_ref().val, 2);
    gap.splice(iso);
    assert_eq!(collect_vals(&list), &[1, 2, 3]);
    list.assert_valid();
}

#[test]
fn cut_close_is_remove() {
    let list = List::<Entry>::new();
    let b = entry(2);
    let b_ptr = entry_ptr(&b);
    list.push_back(entry(1));
    list.push_back(b);
    list.push_back(entry(3));

    let (iso, gap) = unsafe { Isolated::cut(b_ptr) };
    gap.close();
    let b = iso.detach();
    assert_eq!(b.val, 2);
    assert!(!b.links.is_linked());
    assert_eq!(collect_vals(&list), &[1, 3]);
    list.assert_valid();
}

#[test]
fn cut_unlinked_is_degenerate() {
    let a = entry(1);
    let a_ptr = entry_ptr(&a);
    // an `Isolated` owns its element, so ownership moves through the raw
    // pointer here.
    mem::forget(a);

    let (iso, gap) = unsafe { Isolated::cut(a_ptr) };
    gap.close();
    let a = iso.detach();
    assert!(!a.links.is_linked());

    // splicing back into the degenerate gap also restores the unlinked
    // state.
    let a_ptr = entry_ptr(&a);
    mem::forget(a);
    let (iso, gap) = unsafe { Isolated::cut(a_ptr) };
    gap.splice(iso);
    let a = unsafe { Entry::from_ptr(a_ptr) };
    assert!(!a.links.is_linked());
}

#[test]
fn cut_moves_between_lists() {
    let list_a = List::<Entry>::new();
    let list_b = List::<Entry>::new();
    let b = entry(2);
    let b_ptr = entry_ptr(&b);
    list_a.push_back(entry(1));
    list_a.push_back(b);
    list_b.push_back(entry(10));

    // cut the element out of one list and splice it into a position in
    // the other; it is never observable as unlinked in between.
    let (iso, gap) = unsafe { Isolated::cut(b_ptr) };
    gap.close();
    list_b.front_gap().splice(iso);

    assert_eq!(collect_vals(&list_a), &[1]);
    assert_eq!(collect_vals(&list_b), &[2, 10]);
    list_a.assert_valid();
    list_b.assert_valid();
}

#[test]
fn cursor_yields_all() {
    let _trace = trace_init();
    let list = List::<Entry>::new();
    for i in 1..=4 {
        list.push_back(entry(i));
    }

    let mut cursor = list.cursor();
    let mut seen = Vec::new();
    while let Some(entry) = cursor.move_next() {
        seen.push(entry.val);
    }
    assert_eq!(seen, &[1, 2, 3, 4]);
    // the cursor released everything on completion.
    drop(cursor);
    assert_eq!(collect_vals(&list), &[1, 2, 3, 4]);
    list.assert_valid();
}

#[test]
fn cursor_removes() {
    let _trace = trace_init();
    let list = List::<Entry>::new();
    for i in 1..=5 {
        list.push_back(entry(i));
    }

    let mut cursor = list.cursor();
    let mut removed = Vec::new();
    loop {
        let odd = match cursor.move_next() {
            Some(entry) => entry.val % 2 == 1,
            None => break,
        };
        if odd {
            let entry = cursor.remove_current().unwrap();
            assert!(!entry.links.is_linked());
            removed.push(entry.val);
            // the current element is gone.
            assert!(cursor.current().is_none());
            assert!(cursor.remove_current().is_none());
        }
    }
    drop(cursor);

    assert_eq!(removed, &[1, 3, 5]);
    assert_eq!(collect_vals(&list), &[2, 4]);
    list.assert_valid();
}

#[test]
fn cursor_early_drop_reinstalls() {
    let list = List::<Entry>::new();
    for i in 1..=3 {
        list.push_back(entry(i));
    }

    let mut cursor = list.cursor();
    assert_eq!(cursor.move_next().unwrap().val, 1);
    assert_eq!(cursor.current().unwrap().val, 1);
    // dropping the cursor mid-walk releases all of its locks.
    drop(cursor);
    assert_eq!(collect_vals(&list), &[1, 2, 3]);
    list.assert_valid();
}

#[test]
fn retain_drops_rejected() {
    let list = List::<Shared>::new();
    let entries: Vec<_> = (0..6).map(|i| Arc::new(shared_unpinned(i))).collect();
    for e in &entries {
        // Safety: the `Arc`'d entry is never moved out of.
        list.try_push_back(unsafe { Pin::new_unchecked(e.clone()) })
            .ok()
            .expect("all entries are unlinked");
    }

    list.retain(|e| e.val % 2 == 0);

    for e in &entries {
        if e.val % 2 == 0 {
            assert_eq!(Arc::strong_count(e), 2, "kept: {}", e.val);
            assert!(e.links.is_linked());
        } else {
            assert_eq!(Arc::strong_count(e), 1, "dropped: {}", e.val);
            assert!(!e.links.is_linked());
        }
    }
    list.assert_valid();
}

#[test]
fn list_is_send_and_sync() {
    crate::util::assert_send_sync::<List<Entry>>();
    crate::util::assert_send_sync::<Links<Entry>>();
    crate::util::assert_send_sync::<List<Shared>>();
}

#[derive(Debug)]
enum Op {
    PushFront,
    PushBack,
    PopFront,
    Remove(usize),
}

use core::ops::Range;
use proptest::collection::vec;
use proptest::num::usize::ANY;

/// Miri uses a significant amount of time and memory; keep its case count
/// small so CI does not OOM.
#[cfg(miri)]
const FUZZ_RANGE: Range<usize> = 0..10;

/// The default range for proptest's vec strategy is 0..100.
#[cfg(not(miri))]
const FUZZ_RANGE: Range<usize> = 0..100;

proptest::proptest! {
    #[test]
    fn fuzz_list(ops in vec(ANY, FUZZ_RANGE)) {
        let ops = ops
            .iter()
            .map(|i| match i % 4 {
                0 => Op::PushFront,
                1 => Op::PushBack,
                2 => Op::PopFront,
                3 => Op::Remove(i / 4),
                _ => unreachable!(),
            })
            .collect::<Vec<_>>();

        let _trace = trace_init();
        let _span = tracing::info_span!("fuzz").entered();
        tracing::info!(?ops);
        run_fuzz(ops);
    }
}

fn run_fuzz(ops: Vec<Op>) {
    use std::collections::{HashMap, VecDeque};

    let list = List::<Entry>::new();
    let mut reference = VecDeque::new();
    let mut addrs: HashMap<i32, NonNull<Entry>> = HashMap::new();

    for (i, op) in ops.iter().enumerate() {
        let i = i as i32;
        let _span = tracing::info_span!("op", ?i, ?op).entered();
        match op {
            Op::PushFront => {
                let handle = entry(i);
                addrs.insert(i, entry_ptr(&handle));
                list.push_front(handle);
                reference.push_front(i);
            }
            Op::PushBack => {
                let handle = entry(i);
                addrs.insert(i, entry_ptr(&handle));
                list.push_back(handle);
                reference.push_back(i);
            }
            Op::PopFront => {
                let expect = reference.pop_front();
                let got = list.pop_front().map(|e| e.val);
                assert_eq!(expect, got);
                if let Some(v) = got {
                    addrs.remove(&v);
                }
            }
            Op::Remove(n) => {
                if reference.is_empty() {
                    assert!(list.is_empty());
                    tracing::debug!("skipping remove; list is empty");
                    continue;
                }
                let idx = n % reference.len();
                let expect = reference.remove(idx).unwrap();
                let addr = addrs.remove(&expect).unwrap();
                let got = unsafe { list.remove(addr) }.unwrap();
                assert_eq!(expect, got.val);
            }
        }
        assert_eq!(
            collect_vals(&list),
            reference.iter().copied().collect::<Vec<_>>()
        );
        list.assert_valid();
    }
}
