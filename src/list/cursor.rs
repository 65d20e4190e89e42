use super::{links, or_self, Links, List};
use crate::{util::Backoff, Linked};
use core::{fmt, mem, pin::Pin, ptr, ptr::NonNull};

/// A cursor over a [`List`] that other threads are free to keep using.
///
/// The cursor walks the ring forward from the head, yielding each element
/// exactly once. While an element is the cursor's current one, it is
/// *isolated*: both of its own link words and the facing words of its two
/// neighbors are locked, so no other operation can observe, remove, or
/// move it, but the rest of the list is fully operable. The cursor's
/// owner may inspect the current element through [`current`](Self::current)
/// or take it out of the list with
/// [`remove_current`](Self::remove_current).
///
/// Between steps, the cursor keeps the link ahead of its position locked.
/// This pins the walk's position in the ring: the last yielded element
/// cannot be removed out from under the cursor, and an element removed and
/// re-inserted by other threads cannot be yielded a second time.
///
/// All locks are released when the cursor finishes or is dropped,
/// whichever comes first: early `return`s and panics in the surrounding
/// code unwind through the cursor's `Drop` and leave the list fully
/// consistent.
///
/// # Caveats
///
/// The thread driving the cursor must not operate on the *same* list
/// through a second entry point while the cursor is live (another cursor,
/// a pop, a push…): the cursor holds link locks between `move_next` calls,
/// and a second operation from the same thread can wait on those locks
/// forever. Operating on *other* lists from the cursor's owner is fine, as
/// is any operation from other threads.
pub struct Cursor<'list, T: Linked<Links<T>> + ?Sized> {
    list: &'list List<T>,
    /// The node most recently released back into the ring behind the
    /// cursor (initially the head).
    pos: NonNull<Links<T>>,
    state: State<T>,
}

enum State<T: ?Sized> {
    /// Nothing is locked yet.
    Start,
    /// The forward link (`pos.next`, `cand.prev`) is locked; `cand` is the
    /// next node to visit (the head, once the walk has come full circle).
    Forward { cand: NonNull<Links<T>> },
    /// The element at `node` is isolated. Locked words: `pos.next`,
    /// `node.prev`, `node.next`, `succ.prev`.
    Current {
        node: NonNull<Links<T>>,
        succ: NonNull<Links<T>>,
    },
    /// The walk is complete; nothing is locked.
    Done,
}

// === impl Cursor ===

impl<'list, T: Linked<Links<T>> + ?Sized> Cursor<'list, T> {
    pub(super) fn new(list: &'list List<T>) -> Self {
        Self {
            list,
            pos: list.head(),
            state: State::Start,
        }
    }

    /// Advances to the next element, releasing the previous one back into
    /// the ring, and returns a borrow of it; returns [`None`] once the
    /// walk has come full circle back to the head.
    ///
    /// After `None` is returned all locks have been released, and every
    /// further call returns `None`.
    #[cfg_attr(feature = "no-inline", inline(never))]
    pub fn move_next(&mut self) -> Option<Pin<&T>> {
        let cand = match mem::replace(&mut self.state, State::Done) {
            State::Done => return None,
            State::Start => {
                // Lock the forward link out of the head.
                let mut boff = Backoff::new();
                loop {
                    let Some(raw_next) = unsafe { links(self.pos) }.lock_next() else {
                        boff.spin();
                        continue;
                    };
                    let cand = or_self(self.pos, raw_next);
                    if cand == self.pos {
                        // empty list
                        unsafe { links(self.pos) }.unlock_next(self.pos.as_ptr());
                        return None;
                    }
                    match unsafe { links(cand) }.lock_prev() {
                        Some(raw_cp) => {
                            debug_assert_eq!(or_self(cand, raw_cp), self.pos);
                            break cand;
                        }
                        None => {
                            unsafe { links(self.pos) }.unlock_next(raw_next);
                            boff.spin();
                        }
                    }
                }
            }
            State::Forward { cand } => cand,
            State::Current { node, succ } => {
                // Release the current element back into the ring on its
                // trailing side, and step over it. Its forward link stays
                // locked, becoming this step's entry point.
                unsafe {
                    links(self.pos).unlock_next(node.as_ptr());
                    links(node).unlock_prev(self.pos.as_ptr());
                }
                self.pos = node;
                succ
            }
        };

        if cand == self.list.head() {
            // Full circle: release the forward link and finish.
            unsafe {
                links(self.pos).unlock_next(cand.as_ptr());
                links(cand).unlock_prev(self.pos.as_ptr());
            }
            return None;
        }

        // Isolate the candidate: its backward word is already ours; take
        // its forward word and its successor's backward word.
        let mut boff = Backoff::new();
        loop {
            let Some(raw_cn) = unsafe { links(cand) }.lock_next() else {
                boff.spin();
                continue;
            };
            let succ = or_self(cand, raw_cn);
            let Some(raw_sp) = unsafe { links(succ) }.lock_prev() else {
                unsafe { links(cand) }.unlock_next(raw_cn);
                boff.spin();
                continue;
            };
            debug_assert_eq!(or_self(succ, raw_sp), cand);

            test_trace!(node = ?cand, "Cursor::move_next -> isolated");
            self.state = State::Current { node: cand, succ };
            return Some(unsafe {
                // Safety: `cand` is not the head (checked above), so it is
                // an element's links; the element is linked, hence pinned
                // and valid.
                Pin::new_unchecked(&*T::from_links(cand).as_ptr())
            });
        }
    }

    /// Borrows the element the cursor is currently on.
    ///
    /// Returns [`None`] if the cursor is not on an element (before the
    /// first [`move_next`](Self::move_next), after the walk finished, or
    /// after [`remove_current`](Self::remove_current)).
    pub fn current(&self) -> Option<Pin<&T>> {
        match self.state {
            State::Current { node, .. } => Some(unsafe {
                // Safety: as in `move_next`.
                Pin::new_unchecked(&*T::from_links(node).as_ptr())
            }),
            _ => None,
        }
    }

    /// Removes the element the cursor is currently on, returning its
    /// handle; the neighbors are re-linked around it when the cursor moves
    /// on or is dropped.
    ///
    /// Returns [`None`] if the cursor is not on an element.
    pub fn remove_current(&mut self) -> Option<T::Handle> {
        match mem::replace(&mut self.state, State::Done) {
            State::Current { node, succ } => {
                unsafe {
                    // Both of the element's words are ours; it leaves the
                    // ring unlinked.
                    links(node).unlock_next(ptr::null_mut());
                    links(node).unlock_prev(ptr::null_mut());
                }
                test_trace!(node = ?node, "Cursor::remove_current -> removed");
                self.state = State::Forward { cand: succ };
                Some(unsafe { T::from_ptr(T::from_links(node)) })
            }
            other => {
                self.state = other;
                None
            }
        }
    }
}

impl<T: Linked<Links<T>> + ?Sized> Drop for Cursor<'_, T> {
    fn drop(&mut self) {
        match mem::replace(&mut self.state, State::Done) {
            State::Start | State::Done => {}
            State::Forward { cand } => unsafe {
                links(self.pos).unlock_next(cand.as_ptr());
                links(cand).unlock_prev(self.pos.as_ptr());
            },
            State::Current { node, succ } => unsafe {
                // Reinstall the current element, then let go of the
                // forward link.
                links(node).unlock_prev(self.pos.as_ptr());
                links(node).unlock_next(succ.as_ptr());
                links(self.pos).unlock_next(node.as_ptr());
                links(succ).unlock_prev(node.as_ptr());
            },
        }
    }
}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for Cursor<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Start => "Start",
            State::Forward { .. } => "Forward",
            State::Current { .. } => "Current",
            State::Done => "Done",
        };
        f.debug_struct("Cursor")
            .field("list", &self.list)
            .field("pos", &format_args!("{:p}", self.pos))
            .field("state", &state)
            .finish()
    }
}
