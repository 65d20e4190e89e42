use super::*;
use std::{
    sync::atomic::{AtomicBool, Ordering::Relaxed},
    thread,
};

const fn if_miri(miri: i32, not_miri: i32) -> i32 {
    if cfg!(miri) {
        miri
    } else {
        not_miri
    }
}

#[test]
fn producer_consumer() {
    const THREADS: i32 = if_miri(2, 4);
    const MSGS: i32 = if_miri(10, 500);

    let list = Arc::new(List::<Entry>::new());
    let producers: Vec<_> = (0..THREADS)
        .map(|t| {
            let list = list.clone();
            thread::spawn(move || {
                for i in 0..MSGS {
                    list.push_back(entry(t * MSGS + i));
                }
            })
        })
        .collect();

    let mut seen = Vec::new();
    while seen.len() < (THREADS * MSGS) as usize {
        match list.pop_front() {
            Some(e) => seen.push(e.val),
            None => thread::yield_now(),
        }
    }

    for producer in producers {
        producer.join().unwrap();
    }
    assert!(list.pop_front().is_none());
    assert!(list.is_empty());
    list.assert_valid();

    seen.sort();
    assert_eq!(seen, (0..THREADS * MSGS).collect::<Vec<_>>());
}

#[test]
fn pushes_at_both_ends() {
    const MSGS: i32 = if_miri(10, 500);

    let list = Arc::new(List::<Entry>::new());
    let front = {
        let list = list.clone();
        thread::spawn(move || {
            for i in 0..MSGS {
                list.push_front(entry(i));
            }
        })
    };
    let back = {
        let list = list.clone();
        thread::spawn(move || {
            for i in MSGS..MSGS * 2 {
                list.push_back(entry(i));
            }
        })
    };
    front.join().unwrap();
    back.join().unwrap();

    list.assert_valid();
    let mut list = Arc::try_unwrap(list).ok().unwrap();
    let mut seen: Vec<i32> = list.take_all().map(|e| e.val).collect();
    seen.sort();
    assert_eq!(seen, (0..MSGS * 2).collect::<Vec<_>>());
}

#[test]
fn try_push_one_winner() {
    const ROUNDS: i32 = if_miri(5, 50);

    for round in 0..ROUNDS {
        let e = Arc::new(shared_unpinned(round));
        let lists = [
            Arc::new(List::<Shared>::new()),
            Arc::new(List::<Shared>::new()),
        ];
        let threads: Vec<_> = lists
            .iter()
            .cloned()
            .map(|list| {
                let e = e.clone();
                thread::spawn(move || {
                    // Safety: the `Arc`'d entry is never moved out of.
                    list.try_push_front(unsafe { Pin::new_unchecked(e) }).is_ok()
                })
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1, "exactly one list may claim a shared element");

        // dropping the lists drops the winning handle.
        drop(lists);
        assert_eq!(Arc::strong_count(&e), 1);
        assert!(!e.links.is_linked());
    }
}

#[test]
fn remove_races_pop() {
    const N: i32 = if_miri(10, 100);
    const ROUNDS: i32 = if_miri(2, 10);

    for _ in 0..ROUNDS {
        let list = Arc::new(List::<Shared>::new());
        let entries: Vec<_> = (0..N).map(|i| Arc::new(shared_unpinned(i))).collect();
        for e in &entries {
            // Safety: the `Arc`'d entry is never moved out of.
            list.try_push_back(unsafe { Pin::new_unchecked(e.clone()) })
                .ok()
                .expect("all entries are unlinked");
        }

        let remover = {
            let list = list.clone();
            let entries = entries.clone();
            thread::spawn(move || {
                let mut removed = 0usize;
                for e in &entries {
                    // Safety: the entry is an element of `list` (or already
                    // detached by the popper), and our `Arc` keeps its
                    // storage alive.
                    if unsafe { list.remove(NonNull::from(&**e)) }.is_some() {
                        removed += 1;
                    }
                }
                removed
            })
        };

        let mut popped = 0usize;
        loop {
            match list.pop_front() {
                Some(_) => popped += 1,
                None if remover.is_finished() => break,
                None => thread::yield_now(),
            }
        }
        let removed = remover.join().unwrap();
        while list.pop_front().is_some() {
            popped += 1;
        }

        assert_eq!(popped + removed, N as usize);
        assert!(list.is_empty());
        list.assert_valid();
        for e in &entries {
            assert_eq!(Arc::strong_count(e), 1);
            assert!(!e.links.is_linked());
        }
    }
}

#[test]
fn take_all_races_pushes() {
    const MSGS: i32 = if_miri(20, 1000);

    let list = Arc::new(List::<Entry>::new());
    let pusher = {
        let list = list.clone();
        thread::spawn(move || {
            for i in 0..MSGS {
                list.push_back(entry(i));
            }
        })
    };

    let mut got = Vec::new();
    while got.len() < MSGS as usize {
        // Safety: only head-anchored pushes run concurrently.
        for e in unsafe { list.take_all_unchecked() } {
            got.push(e.val);
        }
    }
    pusher.join().unwrap();

    // each batch is a FIFO run, so the concatenation is exactly in push
    // order.
    assert_eq!(got, (0..MSGS).collect::<Vec<_>>());
    assert!(list.is_empty());
    list.assert_valid();
}

#[test]
fn cursors_walk_during_mutation() {
    const WALKERS: i32 = if_miri(2, 3);
    const OPS: i32 = if_miri(50, 2000);

    let list = Arc::new(List::<Entry>::new());
    for i in 0..10 {
        list.push_back(entry(i));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let walkers: Vec<_> = (0..WALKERS)
        .map(|_| {
            let list = list.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Relaxed) {
                    let mut cursor = list.cursor();
                    while let Some(e) = cursor.move_next() {
                        // an isolated element is always intact.
                        assert!(e.val >= 0);
                    }
                }
            })
        })
        .collect();

    for i in 10..OPS {
        if i % 3 == 0 {
            drop(list.pop_front());
        } else {
            list.push_back(entry(i));
        }
    }
    stop.store(true, Relaxed);
    for walker in walkers {
        walker.join().unwrap();
    }

    list.assert_valid();
    let mut list = Arc::try_unwrap(list).ok().unwrap();
    for e in list.take_all() {
        assert!(e.val >= 0);
    }
}

#[test]
fn retain_races_pops() {
    const N: i32 = if_miri(20, 200);

    let list = Arc::new(List::<Entry>::new());
    for i in 0..N {
        list.push_back(entry(i));
    }

    let popper = {
        let list = list.clone();
        thread::spawn(move || {
            let mut popped = 0usize;
            while list.pop_front().is_some() {
                popped += 1;
            }
            popped
        })
    };
    list.retain(|e| e.val % 2 == 0);
    popper.join().unwrap();

    list.assert_valid();
    let mut list = Arc::try_unwrap(list).ok().unwrap();
    for e in list.take_all() {
        assert_eq!(e.val % 2, 0, "every odd element was popped or retained out");
    }
}
