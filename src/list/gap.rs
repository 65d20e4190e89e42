use super::{cut_around, links, or_self, try_own_unlinked, CutAround, Links, List, OwnUnlinked};
use crate::{loom::atomic::Ordering::*, util::Backoff, Linked};
use core::{fmt, marker::PhantomData, mem::ManuallyDrop, pin::Pin, ptr, ptr::NonNull};

/// A temporarily opened position in a [`List`]: the two endpoints of a cut
/// link, both held exclusively locked.
///
/// While a `Gap` is held, no other thread can traverse or mutate the cut
/// position; the rest of the list is unaffected. The gap is resolved by
/// [`close`](Self::close)-ing it back up (also what dropping it does),
/// [`insert`](Self::insert)-ing a new element into it, or
/// [`splice`](Self::splice)-ing an [`Isolated`] element into it.
///
/// Gaps anchored at the list's head are opened with [`List::front_gap`] and
/// [`List::back_gap`]; gaps anchored at an element are opened with the
/// unsafe constructors [`Gap::after`] and [`Gap::before`].
#[must_use = "a `Gap` holds two link locks; dropping it closes the link"]
pub struct Gap<'list, T: Linked<Links<T>> + ?Sized> {
    pub(super) prev: NonNull<Links<T>>,
    pub(super) next: NonNull<Links<T>>,
    pub(super) _list: PhantomData<&'list List<T>>,
}

/// An element cut out of the ring: both of its link words are held locked,
/// and the element belongs to whoever holds the token.
///
/// An `Isolated` element is produced together with the [`Gap`] it left
/// behind by [`Isolated::cut`]. It can be put back (into that gap or any
/// other) with [`Gap::splice`], or permanently detached with
/// [`detach`](Self::detach), which yields the owning handle. Dropping an
/// `Isolated` detaches the element and drops its handle.
#[must_use = "dropping an `Isolated` drops the element"]
pub struct Isolated<'list, T: Linked<Links<T>> + ?Sized> {
    pub(super) node: NonNull<Links<T>>,
    pub(super) _list: PhantomData<&'list List<T>>,
}

// === impl Gap ===

impl<'list, T: Linked<Links<T>> + ?Sized> Gap<'list, T> {
    /// Opens a gap between `anchor` and its successor.
    ///
    /// Blocks (by spinning) while another operation holds either side of
    /// the link.
    ///
    /// # Safety
    ///
    /// `anchor` must point to a valid instance of `T` that is an element of
    /// a list which outlives `'list`, and must remain linked and valid
    /// until the gap is resolved. No
    /// [`take_all_unchecked`](List::take_all_unchecked) may run on that
    /// list while the gap is held.
    pub unsafe fn after(anchor: NonNull<T>) -> Self {
        Self::open_after(T::links(anchor))
    }

    /// Opens a gap between `anchor` and its predecessor.
    ///
    /// # Safety
    ///
    /// As for [`Gap::after`].
    pub unsafe fn before(anchor: NonNull<T>) -> Self {
        Self::open_before(T::links(anchor))
    }

    pub(super) unsafe fn open_after(anchor: NonNull<Links<T>>) -> Self {
        let mut boff = Backoff::new();
        loop {
            let Some(raw_next) = links(anchor).lock_next() else {
                boff.spin();
                continue;
            };
            let succ = or_self(anchor, raw_next);
            let Some(raw_sp) = links(succ).lock_prev() else {
                links(anchor).unlock_next(raw_next);
                boff.spin();
                continue;
            };
            if or_self(succ, raw_sp) != anchor {
                links(succ).unlock_prev(raw_sp);
                links(anchor).unlock_next(raw_next);
                boff.spin();
                continue;
            }
            return Gap {
                prev: anchor,
                next: succ,
                _list: PhantomData,
            };
        }
    }

    pub(super) unsafe fn open_before(anchor: NonNull<Links<T>>) -> Self {
        let mut boff = Backoff::new();
        loop {
            let Some(raw_prev) = links(anchor).lock_prev() else {
                boff.spin();
                continue;
            };
            let pred = or_self(anchor, raw_prev);
            let Some(raw_pn) = links(pred).lock_next() else {
                links(anchor).unlock_prev(raw_prev);
                boff.spin();
                continue;
            };
            if or_self(pred, raw_pn) != anchor {
                links(pred).unlock_next(raw_pn);
                links(anchor).unlock_prev(raw_prev);
                boff.spin();
                continue;
            }
            return Gap {
                prev: pred,
                next: anchor,
                _list: PhantomData,
            };
        }
    }

    /// Closes the gap, re-linking its two endpoints to each other and
    /// releasing both locks.
    ///
    /// If the gap came from [`Gap::after`]/[`Gap::before`]/
    /// [`List::front_gap`]/[`List::back_gap`], this restores the list
    /// exactly as it was. If it came from [`Isolated::cut`], this completes
    /// the removal of the cut element (which the `Isolated` token still
    /// owns).
    pub fn close(self) {
        let this = ManuallyDrop::new(self);
        unsafe { close_raw(this.prev, this.next) }
    }

    /// Links a new element into the gap, consuming it.
    ///
    /// The element ends up between the gap's two endpoints; both locks are
    /// released. Inserting into a gap opened after (resp. before) an
    /// anchor is how an element is placed at an arbitrary position in a
    /// list.
    ///
    /// The element's handle must be exclusive (see
    /// [`List::push_front`](List::push_front) on shared handles).
    pub fn insert(self, item: T::Handle) {
        let ptr = T::into_ptr(item);
        let node = unsafe { T::links(ptr) };
        let this = ManuallyDrop::new(self);
        unsafe {
            // Invisible until the endpoints are released below.
            links(node).next.store(this.next.as_ptr(), Relaxed);
            links(node).prev.store(this.prev.as_ptr(), Relaxed);
            links(this.next).unlock_prev(node.as_ptr());
            links(this.prev).unlock_next(node.as_ptr());
        }
    }

    /// Links an [`Isolated`] element into the gap, consuming both tokens
    /// and releasing all four locks.
    ///
    /// The element need not be the one whose cut produced this gap:
    /// splicing the gap of one [`cut`](Isolated::cut) with the element of
    /// another moves an element between positions (or lists) without it
    /// ever being observable as unlinked.
    pub fn splice(self, node: Isolated<'_, T>) {
        let this = ManuallyDrop::new(self);
        let iso = ManuallyDrop::new(node);
        unsafe {
            links(iso.node).unlock_prev(this.prev.as_ptr());
            links(iso.node).unlock_next(this.next.as_ptr());
            links(this.next).unlock_prev(iso.node.as_ptr());
            links(this.prev).unlock_next(iso.node.as_ptr());
        }
    }
}

impl<T: Linked<Links<T>> + ?Sized> Drop for Gap<'_, T> {
    fn drop(&mut self) {
        unsafe { close_raw(self.prev, self.next) }
    }
}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for Gap<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { prev, next, _list } = self;
        f.debug_struct("Gap")
            .field("prev", &format_args!("{:p}", *prev))
            .field("next", &format_args!("{:p}", *next))
            .finish()
    }
}

unsafe fn close_raw<T: ?Sized>(prev: NonNull<Links<T>>, next: NonNull<Links<T>>) {
    links(prev).unlock_next(next.as_ptr());
    links(next).unlock_prev(prev.as_ptr());
}

// === impl Isolated ===

impl<'list, T: Linked<Links<T>> + ?Sized> Isolated<'list, T> {
    /// Cuts `node` out of its ring, returning the isolated element and the
    /// [`Gap`] it left behind.
    ///
    /// All four surrounding link words are locked: the neighbors cannot
    /// observe the cut, and the element cannot be reached, until the
    /// tokens are resolved. If `node` was not in a list, the returned gap
    /// is the node's own two words, and resolving the tokens in any order
    /// restores (or detaches from) the unlinked state.
    ///
    /// # Safety
    ///
    /// `node` must point to a valid instance of `T`, whose storage outlives
    /// both returned tokens and which is an element of a list outliving
    /// `'list` (or unlinked). No
    /// [`take_all_unchecked`](List::take_all_unchecked) may run on that
    /// list while the tokens are held.
    pub unsafe fn cut(node: NonNull<T>) -> (Self, Gap<'list, T>) {
        let node_links = T::links(node);
        let mut boff = Backoff::new();
        loop {
            match cut_around(node_links) {
                CutAround::Cut { prev, next } => {
                    return (
                        Isolated {
                            node: node_links,
                            _list: PhantomData,
                        },
                        Gap {
                            prev,
                            next,
                            _list: PhantomData,
                        },
                    )
                }
                CutAround::Unlinked => match try_own_unlinked(node_links) {
                    OwnUnlinked::Owned { .. } => {
                        // The node all by itself: its own words are the
                        // gap's endpoints.
                        return (
                            Isolated {
                                node: node_links,
                                _list: PhantomData,
                            },
                            Gap {
                                prev: node_links,
                                next: node_links,
                                _list: PhantomData,
                            },
                        );
                    }
                    OwnUnlinked::Busy | OwnUnlinked::Linked => boff.spin(),
                },
            }
        }
    }

    /// Borrows the isolated element.
    pub fn as_ref(&self) -> Pin<&T> {
        unsafe {
            // Safety: elements must be pinned while linked, and this one
            // cannot have been unlinked since the token exists.
            Pin::new_unchecked(&*T::from_links(self.node).as_ptr())
        }
    }

    /// Permanently detaches the element, unlinking it and returning the
    /// owning handle.
    ///
    /// The gap produced alongside this token still holds the neighbors;
    /// [`close`](Gap::close) it to finish a removal, or
    /// [`splice`](Gap::splice) a different element into it.
    pub fn detach(self) -> T::Handle {
        let this = ManuallyDrop::new(self);
        unsafe { detach_raw::<T>(this.node) }
    }
}

impl<T: Linked<Links<T>> + ?Sized> Drop for Isolated<'_, T> {
    fn drop(&mut self) {
        drop(unsafe { detach_raw::<T>(self.node) });
    }
}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for Isolated<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self { node, _list } = self;
        f.debug_struct("Isolated")
            .field("node", &format_args!("{:p}", *node))
            .finish()
    }
}

unsafe fn detach_raw<T: Linked<Links<T>> + ?Sized>(node: NonNull<Links<T>>) -> T::Handle {
    links(node).unlock_next(ptr::null_mut());
    links(node).unlock_prev(ptr::null_mut());
    T::from_ptr(T::from_links(node))
}
