//! A multi-thread-aware [intrusive] circular doubly-linked list.
//!
//! See the documentation for the [`List`] type for details.
//!
//! [intrusive]: crate#intrusive-data-structures
use crate::{
    loom::atomic::{AtomicPtr, Ordering::*},
    util::Backoff,
    Linked,
};
use core::{fmt, marker::PhantomPinned, pin::Pin, ptr::{self, NonNull}};

mod cursor;
mod gap;

pub use self::cursor::Cursor;
pub use self::gap::{Gap, Isolated};


/// A multi-thread-aware [intrusive] circular doubly-linked list, locked one
/// link at a time.
///
/// Any number of threads may concurrently push, pop, remove, splice, and
/// traverse a shared `List` through `&self`; there is no single list lock.
/// Instead, every operation takes exclusive ownership of only the pointer
/// words surrounding the position it mutates, by atomically swapping a
/// reserved *busy* sentinel into each word. Operations touching disjoint
/// parts of the list never contend; operations that do collide roll back,
/// wait out an exponential backoff, and retry.
///
/// In order to be part of a `List`, a type `T` must implement [`Linked`] for
/// [`list::Links<T>`](Links).
///
/// # Examples
///
/// ```
/// use hyphae::{Linked, list::{self, List}};
/// use std::{mem, pin::Pin, ptr::{self, NonNull}, sync::Arc, thread};
///
/// /// A simple list entry that stores an `i32`.
/// #[derive(Debug, Default)]
/// struct Entry {
///     links: list::Links<Entry>,
///     val: i32,
/// }
///
/// // Implement the `Linked` trait for our entry type so that it can be
/// // used as a list member.
/// unsafe impl Linked<list::Links<Entry>> for Entry {
///     // In this example, our entries will be "owned" by a `Box`, but any
///     // heap-allocated type that owns an element may be used.
///     //
///     // An element *must not* move while part of an intrusive data
///     // structure. In many cases, `Pin` may be used to enforce this.
///     type Handle = Pin<Box<Self>>;
///
///     /// Convert an owned `Handle` into a raw pointer.
///     fn into_ptr(handle: Pin<Box<Entry>>) -> NonNull<Entry> {
///         unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
///     }
///
///     /// Convert a raw pointer back into an owned `Handle`.
///     unsafe fn from_ptr(ptr: NonNull<Entry>) -> Pin<Box<Entry>> {
///         // Safety: `NonNull` *must* be constructed from a pinned reference
///         // which the list implementation will not move out of.
///         Pin::new_unchecked(Box::from_raw(ptr.as_ptr()))
///     }
///
///     /// Access an element's `Links`.
///     unsafe fn links(target: NonNull<Entry>) -> NonNull<list::Links<Entry>> {
///         NonNull::new_unchecked(ptr::addr_of_mut!((*target.as_ptr()).links))
///     }
///
///     /// Recover an element from its `Links`.
///     unsafe fn from_links(links: NonNull<list::Links<Entry>>) -> NonNull<Entry> {
///         NonNull::new_unchecked(
///             links.as_ptr().byte_sub(mem::offset_of!(Entry, links)).cast(),
///         )
///     }
/// }
///
/// impl Entry {
///     fn new(val: i32) -> Pin<Box<Self>> {
///         Box::pin(Entry { val, ..Default::default() })
///     }
/// }
///
/// let list = Arc::new(List::<Entry>::new());
///
/// // Spawn some producer threads.
/// let producers: Vec<_> = (0..2)
///     .map(|t| {
///         let list = list.clone();
///         thread::spawn(move || {
///             for i in 0..4 {
///                 list.push_back(Entry::new(t * 10 + i));
///             }
///         })
///     })
///     .collect();
///
/// // Pop entries concurrently with the producers.
/// let mut seen = Vec::new();
/// loop {
///     let done = Arc::strong_count(&list) == 1;
///     while let Some(entry) = list.pop_front() {
///         seen.push(entry.val);
///     }
///     if done {
///         break;
///     }
///     thread::yield_now();
/// }
///
/// for producer in producers {
///     producer.join().unwrap();
/// }
///
/// seen.sort();
/// assert_eq!(&seen[..], &[0, 1, 2, 3, 10, 11, 12, 13]);
/// ```
///
/// # Implementation Details
///
/// The list is a ring of [`Links`] structures: each holds an atomic `next`
/// and `prev` word addressing the neighboring `Links`, and the list's head
/// is itself a bare node in the ring (an empty list is a head linked to
/// itself). Embedded links are translated back to their elements with
/// [`Linked::from_links`].
///
/// ## Link locking
///
/// A *link* between adjacent nodes `A` and `B` is the pair of words
/// (`A.next`, `B.prev`). A thread claims one word with a single atomic
/// swap that stores the busy sentinel (the address `1`, never a valid
/// node); the swap fails if the word already held the sentinel, and
/// succeeds otherwise, with the swapped-out value remembered. A thread
/// owning both words of a link may rewrite that link; ownership ends
/// either by storing the remembered value back (rollback) or by storing
/// the final value (commit). Claiming swaps are `AcqRel` and releasing
/// stores are `Release`, so each link's mutators are totally ordered and
/// each observes its predecessor's writes.
///
/// Every operation claims the two or four words around its position in a
/// fixed per-operation order, verifying each claimed value against what
/// the ring shape implies it must be. Any failed claim or verification
/// rolls the operation's claims back in reverse order, and the operation
/// retries after an [exponentially growing](crate#caveats) pause. Two
/// colliding operations may each force the other to roll back, but the
/// randomized-by-backoff retry windows make simultaneous progress failure
/// vanishingly unlikely; there is no fairness guarantee.
///
/// ## Unlinked nodes
///
/// An unlinked node (a fresh [`Links::new`], a removed element, or an
/// empty head) stores null in both words; a null word read through the
/// protocol is decoded as a self-link. This gives `static` heads a `const`
/// initializer even though a node cannot name its own address until it is
/// pinned.
///
/// The head node lives out-of-line from the `List` handle itself (owned,
/// or borrowed from a `static` via [`List::with_static_head`]), so the
/// `List` value may be moved freely while elements point at its head.
///
/// [intrusive]: crate#intrusive-data-structures
pub struct List<T: Linked<Links<T>> + ?Sized> {
    head: NonNull<Links<T>>,

    /// If the head node is in a `static`, we cannot drop it when the list
    /// is dropped.
    head_is_static: bool,
}

/// Links to other nodes in a [`List`].
///
/// In order to be part of a [`List`], a type must contain an instance of
/// this type, and must implement the [`Linked`] trait for `Links<Self>`.
pub struct Links<T: ?Sized> {
    /// The next node in the ring.
    next: AtomicPtr<Links<T>>,

    /// The previous node in the ring.
    prev: AtomicPtr<Links<T>>,

    /// Linked list links must always be `!Unpin`, in order to ensure that
    /// they never recieve LLVM `noalias` annotations; see also
    /// <https://github.com/rust-lang/rust/issues/63818>.
    _unpin: PhantomPinned,
}

/// An iterator over the elements detached from a [`List`] by
/// [`List::take_all`], yielding owning [`Handle`]s.
///
/// Dropping a `Drain` drops all remaining elements.
///
/// [`Handle`]: crate::Linked::Handle
#[must_use = "iterators are lazy; dropping a `Drain` drops its elements"]
pub struct Drain<T: Linked<Links<T>> + ?Sized> {
    next: *mut Links<T>,
}

/// The busy sentinel. Never a valid node address, as `Links` is
/// word-aligned.
#[inline(always)]
fn busy<T: ?Sized>() -> *mut Links<T> {
    1 as *mut Links<T>
}

/// Shorthand for dereferencing a raw node pointer.
#[inline(always)]
unsafe fn links<'a, T: ?Sized>(ptr: NonNull<Links<T>>) -> &'a Links<T> {
    ptr.as_ref()
}

/// Decodes a link word read from `owner`: a null word stands for the
/// owning node itself (an untouched head or a fresh `Links` is its own
/// neighbor).
///
/// The value must not be the busy sentinel.
#[inline(always)]
fn or_self<T: ?Sized>(owner: NonNull<Links<T>>, val: *mut Links<T>) -> NonNull<Links<T>> {
    debug_assert_ne!(val, busy::<T>());
    match NonNull::new(val) {
        Some(ptr) => ptr,
        None => owner,
    }
}

// === impl List ===

feature! {
    #![feature = "alloc"]

    use alloc::boxed::Box;

    impl<T: Linked<Links<T>> + ?Sized> List<T> {
        /// Returns a new empty list with an owned head node.
        ///
        /// The head allocation is released when the `List` is dropped. To
        /// construct a list without allocating (such as in a `static`), see
        /// [`List::with_static_head`].
        #[must_use]
        pub fn new() -> Self {
            let head = Box::into_raw(Box::new(Links::new()));
            let head = unsafe {
                // Safety: `Box::into_raw` never returns null.
                NonNull::new_unchecked(head)
            };
            Self {
                head,
                head_is_static: false,
            }
        }
    }

    impl<T: Linked<Links<T>> + ?Sized> Default for List<T> {
        fn default() -> Self {
            Self::new()
        }
    }
}

impl<T: Linked<Links<T>> + ?Sized> List<T> {
    /// Returns a new empty list whose head node is the provided `static`.
    ///
    /// This is primarily used for creating a `List` as a `static` variable,
    /// and requires no allocation:
    ///
    /// ```
    /// # use hyphae::{Linked, list::{self, List}};
    /// # use std::{mem, pin::Pin, ptr::{self, NonNull}};
    /// # #[derive(Debug, Default)]
    /// # struct Entry {
    /// #     links: list::Links<Entry>,
    /// # }
    /// # unsafe impl Linked<list::Links<Entry>> for Entry {
    /// #     type Handle = Pin<Box<Self>>;
    /// #     fn into_ptr(handle: Pin<Box<Entry>>) -> NonNull<Entry> {
    /// #         unsafe { NonNull::from(Box::leak(Pin::into_inner_unchecked(handle))) }
    /// #     }
    /// #     unsafe fn from_ptr(ptr: NonNull<Entry>) -> Pin<Box<Entry>> {
    /// #         Pin::new_unchecked(Box::from_raw(ptr.as_ptr()))
    /// #     }
    /// #     unsafe fn links(target: NonNull<Entry>) -> NonNull<list::Links<Entry>> {
    /// #         NonNull::new_unchecked(ptr::addr_of_mut!((*target.as_ptr()).links))
    /// #     }
    /// #     unsafe fn from_links(links: NonNull<list::Links<Entry>>) -> NonNull<Entry> {
    /// #         NonNull::new_unchecked(
    /// #             links.as_ptr().byte_sub(mem::offset_of!(Entry, links)).cast(),
    /// #         )
    /// #     }
    /// # }
    /// static LIST: List<Entry> = {
    ///     static HEAD: list::Links<Entry> = list::Links::new();
    ///
    ///     // Safety: `HEAD` is defined inside the initializer for `LIST`,
    ///     // so it cannot be used as the head of any other list.
    ///     unsafe { List::with_static_head(&HEAD) }
    /// };
    /// ```
    ///
    /// # Safety
    ///
    /// The provided `head` must never be used as the head of another list,
    /// or linked into a list as an element.
    #[cfg(not(loom))]
    #[must_use]
    pub const unsafe fn with_static_head(head: &'static Links<T>) -> Self {
        Self {
            head: NonNull::new_unchecked(head as *const Links<T> as *mut Links<T>),
            head_is_static: true,
        }
    }

    /// Returns `true` if this list was empty when observed.
    ///
    /// This is a racy snapshot: another thread may have pushed or popped by
    /// the time the result is inspected. A position mid-mutation reads as
    /// non-empty.
    pub fn is_empty(&self) -> bool {
        let next = unsafe { links(self.head) }.next.load(Acquire);
        next.is_null() || next == self.head.as_ptr()
    }

    /// Appends an element to the head of the list.
    ///
    /// The element is yielded first by forward traversal and by
    /// [`pop_front`](Self::pop_front).
    ///
    /// This method takes ownership of the element's [`Handle`]; ownership
    /// is returned by whichever operation later detaches the element. If
    /// `T::Handle` is a shared handle (such as a pinned [`Arc`]), the
    /// caller must know the element is not already in a list; when in
    /// doubt, use [`try_push_front`](Self::try_push_front) instead.
    ///
    /// [`Handle`]: crate::Linked::Handle
    /// [`Arc`]: alloc::sync::Arc
    pub fn push_front(&self, item: T::Handle) {
        let ptr = T::into_ptr(item);
        let node = unsafe { T::links(ptr) };
        debug_assert!(!unsafe { links(node) }.is_linked());
        unsafe { link_after(self.head, node) }
    }

    /// Appends an element to the tail of the list.
    ///
    /// The element is yielded last by forward traversal; combined with
    /// [`pop_front`](Self::pop_front) this gives FIFO order.
    ///
    /// The same handle-ownership rules as [`push_front`](Self::push_front)
    /// apply.
    pub fn push_back(&self, item: T::Handle) {
        let ptr = T::into_ptr(item);
        let node = unsafe { T::links(ptr) };
        debug_assert!(!unsafe { links(node) }.is_linked());
        unsafe { link_before(self.head, node) }
    }

    /// Appends an element to the head of the list if it is not currently in
    /// a list.
    ///
    /// On failure, the element is untouched and its handle is returned.
    ///
    /// This is the safe way to enqueue an element reachable through shared
    /// handles (such as a pinned [`Arc`]), where the element's membership
    /// is not statically known: the element's own links are locked before
    /// the membership check, so exactly one of any number of racing
    /// `try_push` calls can win.
    ///
    /// [`Arc`]: alloc::sync::Arc
    pub fn try_push_front(&self, item: T::Handle) -> Result<(), T::Handle> {
        let ptr = T::into_ptr(item);
        let node = unsafe { T::links(ptr) };
        if unsafe { try_link_after(self.head, node) } {
            Ok(())
        } else {
            Err(unsafe { T::from_ptr(ptr) })
        }
    }

    /// Appends an element to the tail of the list if it is not currently in
    /// a list.
    ///
    /// On failure, the element is untouched and its handle is returned.
    /// See [`try_push_front`](Self::try_push_front).
    pub fn try_push_back(&self, item: T::Handle) -> Result<(), T::Handle> {
        let ptr = T::into_ptr(item);
        let node = unsafe { T::links(ptr) };
        if unsafe { try_link_before(self.head, node) } {
            Ok(())
        } else {
            Err(unsafe { T::from_ptr(ptr) })
        }
    }

    /// Detaches and returns the first element of the list, or [`None`] if
    /// the list was empty.
    #[cfg_attr(feature = "no-inline", inline(never))]
    pub fn pop_front(&self) -> Option<T::Handle> {
        let head = self.head;
        let mut boff = Backoff::new();
        loop {
            let Some(raw_first) = unsafe { links(head) }.lock_next() else {
                boff.spin();
                continue;
            };
            let first = or_self(head, raw_first);
            if first == head {
                // empty; put the word back exactly as it was.
                unsafe { links(head) }.unlock_next(raw_first);
                return None;
            }

            let Some(raw_fp) = unsafe { links(first) }.lock_prev() else {
                unsafe { links(head) }.unlock_next(raw_first);
                boff.spin();
                continue;
            };
            debug_assert_eq!(or_self(first, raw_fp), head);

            let Some(raw_fn) = unsafe { links(first) }.lock_next() else {
                unsafe {
                    links(first).unlock_prev(raw_fp);
                    links(head).unlock_next(raw_first);
                }
                boff.spin();
                continue;
            };
            let succ = or_self(first, raw_fn);

            let Some(raw_sp) = unsafe { links(succ) }.lock_prev() else {
                unsafe {
                    links(first).unlock_next(raw_fn);
                    links(first).unlock_prev(raw_fp);
                    links(head).unlock_next(raw_first);
                }
                boff.spin();
                continue;
            };
            debug_assert_eq!(or_self(succ, raw_sp), first);

            unsafe {
                links(head).unlock_next(succ.as_ptr());
                links(succ).unlock_prev(head.as_ptr());
                links(first).unlock_next(ptr::null_mut());
                links(first).unlock_prev(ptr::null_mut());
            }
            test_trace!(first = ?first, "List::pop_front -> popped");
            return Some(unsafe { T::from_ptr(T::from_links(first)) });
        }
    }

    /// Detaches *every* element of the list in *O*(1), returning an
    /// iterator of their handles.
    ///
    /// The whole chain leaves the ring in a single commit; unlike repeated
    /// [`pop_front`](Self::pop_front) calls, no element pushed by another
    /// thread after this method returns can appear in the result. Elements
    /// not consumed from the returned [`Drain`] are dropped with it.
    ///
    /// This method requires `&mut self` (exclusive access to the list),
    /// which makes it trivially safe. [`take_all_unchecked`] performs the
    /// same operation through `&self`, concurrently with head-anchored
    /// pushes and pops, at the price of an unsafe contract.
    ///
    /// [`take_all_unchecked`]: Self::take_all_unchecked
    pub fn take_all(&mut self) -> Drain<T> {
        unsafe {
            // Safety: `&mut self` means no cursor borrows this list and no
            // other thread can be mid-operation on it.
            self.take_all_unchecked()
        }
    }

    /// Detaches every element of the list in *O*(1), without requiring
    /// exclusive access to the list.
    ///
    /// This may run concurrently with `push_front`/`push_back`/`try_push_*`
    /// /`pop_front`/`take_all_unchecked` on the same list: those operations
    /// all pass through the head's links, which this operation owns for the
    /// duration of its commit.
    ///
    /// # Safety
    ///
    /// No operation anchored in the *middle* of the list
    /// ([`remove`](Self::remove), [`insert_after`](Self::insert_after) and
    /// its variants, a [`Cursor`], a [`Gap`], or an [`Isolated`]) may be
    /// active on this list from any thread while this method runs or while
    /// the returned [`Drain`] is alive. Those operations lock links the
    /// single-commit detach does not observe, and the detached chain is not
    /// a ring their rollbacks make sense in. Operations that pass through
    /// the head are fine.
    #[cfg_attr(feature = "no-inline", inline(never))]
    pub unsafe fn take_all_unchecked(&self) -> Drain<T> {
        let head = self.head;
        let mut boff = Backoff::new();
        loop {
            let Some(raw_first) = links(head).lock_next() else {
                boff.spin();
                continue;
            };
            let first = or_self(head, raw_first);
            if first == head {
                links(head).unlock_next(raw_first);
                return Drain {
                    next: ptr::null_mut(),
                };
            }

            let Some(raw_last) = links(head).lock_prev() else {
                links(head).unlock_next(raw_first);
                boff.spin();
                continue;
            };
            let last = or_self(head, raw_last);
            debug_assert_ne!(last, head);

            // Close the head into an empty ring, then turn the detached
            // ring into a linear chain: its first element still points
            // backwards at the last, and the last's `next` is the null
            // terminator. Writing `first.prev` is ours to do by owning
            // `head.next`, and `last.next` by owning `head.prev`.
            links(head).unlock_next(head.as_ptr());
            links(head).unlock_prev(head.as_ptr());
            links(first).prev.store(last.as_ptr(), Release);
            links(last).next.store(ptr::null_mut(), Release);
            test_trace!(first = ?first, last = ?last, "List::take_all -> beheaded");
            return Drain {
                next: first.as_ptr(),
            };
        }
    }

    /// Removes an arbitrary element from whatever position it occupies in
    /// this list, returning its handle; returns [`None`] (and changes
    /// nothing) if the element was not in a list.
    ///
    /// # Safety
    ///
    /// - `node` must point to a valid instance of `T` that is an element of
    ///   this list, or unlinked.
    /// - The element's storage must remain valid for the duration of the
    ///   call, even if another thread detaches the element first: keep a
    ///   shared handle alive across the call, or otherwise guarantee the
    ///   storage is not reclaimed (epochs, quiescence, …).
    /// - No [`take_all_unchecked`](Self::take_all_unchecked) may run
    ///   concurrently with this method.
    #[cfg_attr(feature = "no-inline", inline(never))]
    pub unsafe fn remove(&self, node: NonNull<T>) -> Option<T::Handle> {
        let node_links = T::links(node);
        match cut_around(node_links) {
            CutAround::Unlinked => None,
            CutAround::Cut { prev, next } => {
                // Bridge the neighbors, then unlink the element.
                links(prev).unlock_next(next.as_ptr());
                links(next).unlock_prev(prev.as_ptr());
                links(node_links).unlock_next(ptr::null_mut());
                links(node_links).unlock_prev(ptr::null_mut());
                test_trace!(node = ?node_links, "List::remove -> removed");
                Some(T::from_ptr(node))
            }
        }
    }

    /// Links a new element in immediately after `anchor`, which may be
    /// anywhere in this list.
    ///
    /// # Safety
    ///
    /// `anchor` must point to a valid instance of `T` that is an element of
    /// this list, and must remain one for the duration of the call (hold a
    /// shared handle, or know no other thread removes it).
    pub unsafe fn insert_after(&self, anchor: NonNull<T>, item: T::Handle) {
        let ptr = T::into_ptr(item);
        link_after(T::links(anchor), T::links(ptr))
    }

    /// Links a new element in immediately before `anchor`, which may be
    /// anywhere in this list.
    ///
    /// # Safety
    ///
    /// As for [`insert_after`](Self::insert_after).
    pub unsafe fn insert_before(&self, anchor: NonNull<T>, item: T::Handle) {
        let ptr = T::into_ptr(item);
        link_before(T::links(anchor), T::links(ptr))
    }

    /// Links an element in immediately after `anchor` if the element is not
    /// currently in a list; on failure the element is untouched and its
    /// handle is returned.
    ///
    /// # Safety
    ///
    /// As for [`insert_after`](Self::insert_after).
    pub unsafe fn try_insert_after(
        &self,
        anchor: NonNull<T>,
        item: T::Handle,
    ) -> Result<(), T::Handle> {
        let ptr = T::into_ptr(item);
        if try_link_after(T::links(anchor), T::links(ptr)) {
            Ok(())
        } else {
            Err(T::from_ptr(ptr))
        }
    }

    /// Links an element in immediately before `anchor` if the element is
    /// not currently in a list; on failure the element is untouched and its
    /// handle is returned.
    ///
    /// # Safety
    ///
    /// As for [`insert_after`](Self::insert_after).
    pub unsafe fn try_insert_before(
        &self,
        anchor: NonNull<T>,
        item: T::Handle,
    ) -> Result<(), T::Handle> {
        let ptr = T::into_ptr(item);
        if try_link_before(T::links(anchor), T::links(ptr)) {
            Ok(())
        } else {
            Err(T::from_ptr(ptr))
        }
    }

    /// Returns a [`Cursor`] over this list.
    ///
    /// The cursor yields each element exactly once, holding it temporarily
    /// isolated from the ring so that it may be inspected or
    /// [removed](Cursor::remove_current) while other threads operate on the
    /// rest of the list.
    #[must_use]
    pub fn cursor(&self) -> Cursor<'_, T> {
        Cursor::new(self)
    }

    /// Walks the list, keeping only the elements for which `f` returns
    /// `true`; rejected elements are removed and dropped.
    ///
    /// Other threads may operate on the list concurrently; elements they
    /// push behind the walk's position are not visited.
    pub fn retain(&self, mut f: impl FnMut(Pin<&T>) -> bool) {
        let mut cursor = self.cursor();
        loop {
            let keep = match cursor.move_next() {
                Some(entry) => f(entry),
                None => break,
            };
            if !keep {
                drop(cursor.remove_current());
            }
        }
    }

    /// Opens a [`Gap`] between the head and the first element.
    ///
    /// While the gap is held, no other operation can observe or mutate the
    /// front of the list; [inserting](Gap::insert) into the gap is
    /// equivalent to [`push_front`](Self::push_front).
    #[must_use]
    pub fn front_gap(&self) -> Gap<'_, T> {
        unsafe { Gap::open_after(self.head) }
    }

    /// Opens a [`Gap`] between the last element and the head.
    ///
    /// [Inserting](Gap::insert) into the gap is equivalent to
    /// [`push_back`](Self::push_back).
    #[must_use]
    pub fn back_gap(&self) -> Gap<'_, T> {
        unsafe { Gap::open_before(self.head) }
    }

    /// Asserts as many of the list's invariants as possible.
    ///
    /// The list must be quiescent: no other thread may be mid-operation on
    /// it, or the walk may observe (and panic on) a transient state.
    pub fn assert_valid(&self) {
        let head = self.head;
        let mut curr = head;
        loop {
            let raw_next = unsafe { links(curr) }.next.load(Acquire);
            assert_ne!(
                raw_next,
                busy(),
                "a quiescent list must not contain busy words"
            );
            let next = or_self(curr, raw_next);
            let raw_prev = unsafe { links(next) }.prev.load(Acquire);
            assert_ne!(
                raw_prev,
                busy(),
                "a quiescent list must not contain busy words"
            );
            assert_eq!(
                or_self(next, raw_prev),
                curr,
                "every node's successor must link back to it"
            );
            curr = next;
            if curr == head {
                return;
            }
        }
    }

    pub(crate) fn head(&self) -> NonNull<Links<T>> {
        self.head
    }
}

impl<T: Linked<Links<T>> + ?Sized> Drop for List<T> {
    fn drop(&mut self) {
        // `&mut self`: the list is quiescent. Drop any remaining elements,
        // then the head if we own it.
        drop(self.take_all());

        #[cfg(feature = "alloc")]
        if !self.head_is_static {
            drop(unsafe { Box::from_raw(self.head.as_ptr()) });
        }
    }
}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for List<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            head,
            head_is_static,
        } = self;
        f.debug_struct("List")
            .field("head", &format_args!("{:p}", *head))
            .field("head_is_static", head_is_static)
            .field("is_empty", &self.is_empty())
            .finish()
    }
}

/// A `List` is a shared-mutation structure: all operations go through
/// `&self`, so sending or sharing it requires that elements (and their
/// handles, which operations hand across threads) are sendable.
unsafe impl<T> Send for List<T>
where
    T: Send + Linked<Links<T>> + ?Sized,
    T::Handle: Send,
{
}
unsafe impl<T> Sync for List<T>
where
    T: Send + Linked<Links<T>> + ?Sized,
    T::Handle: Send,
{
}

// === impl Links ===

impl<T: ?Sized> Links<T> {
    /// Returns new links for a [`List`].
    #[cfg(not(loom))]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
            _unpin: PhantomPinned,
        }
    }

    /// Returns new links for a [`List`].
    #[cfg(loom)]
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            prev: AtomicPtr::new(ptr::null_mut()),
            _unpin: PhantomPinned,
        }
    }

    /// Returns `true` if this node was linked into a list when observed.
    ///
    /// A node mid-operation (one of its words busy) reads as linked. Like
    /// [`List::is_empty`], this is a racy snapshot.
    pub fn is_linked(&self) -> bool {
        let next = self.next.load(Acquire);
        !(next.is_null() || ptr::eq(next, self))
    }

    /// Attempts to take exclusive ownership of this node's forward word,
    /// returning the prior value on success.
    ///
    /// This is the only point of atomicity in the whole structure: a single
    /// swap that both observes the word and claims it.
    #[inline(always)]
    fn lock_next(&self) -> Option<*mut Links<T>> {
        let prev = self.next.swap(busy(), AcqRel);
        (prev != busy()).then_some(prev)
    }

    /// Attempts to take exclusive ownership of this node's backward word,
    /// returning the prior value on success.
    #[inline(always)]
    fn lock_prev(&self) -> Option<*mut Links<T>> {
        let prev = self.prev.swap(busy(), AcqRel);
        (prev != busy()).then_some(prev)
    }

    /// Releases this node's forward word, publishing `val` (a rollback of
    /// the claimed value, or a commit of a new one).
    #[inline(always)]
    fn unlock_next(&self, val: *mut Links<T>) {
        debug_assert_ne!(val, busy());
        self.next.store(val, Release);
    }

    /// Releases this node's backward word, publishing `val`.
    #[inline(always)]
    fn unlock_prev(&self, val: *mut Links<T>) {
        debug_assert_ne!(val, busy());
        self.prev.store(val, Release);
    }
}

#[cfg(not(loom))]
impl<T: ?Sized> Default for Links<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for Links<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        struct FmtLink<T: ?Sized>(*mut Links<T>);
        impl<T: ?Sized> fmt::Debug for FmtLink<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.0.is_null() {
                    f.write_str("null")
                } else if self.0 == busy() {
                    f.write_str("<busy>")
                } else {
                    fmt::Pointer::fmt(&self.0, f)
                }
            }
        }

        f.debug_struct("Links")
            .field("self", &format_args!("{:p}", self))
            .field("next", &FmtLink(self.next.load(Acquire)))
            .field("prev", &FmtLink(self.prev.load(Acquire)))
            .finish()
    }
}

// === impl Drain ===

impl<T: Linked<Links<T>> + ?Sized> Iterator for Drain<T> {
    type Item = T::Handle;

    fn next(&mut self) -> Option<T::Handle> {
        let curr = NonNull::new(self.next)?;
        unsafe {
            let next = links(curr).next.load(Acquire);
            debug_assert_ne!(next, busy(), "an operation was live inside a taken chain");
            self.next = next;

            // The node leaves the chain unlinked, ready for reuse.
            links(curr).next.store(ptr::null_mut(), Relaxed);
            links(curr).prev.store(ptr::null_mut(), Relaxed);
            Some(T::from_ptr(T::from_links(curr)))
        }
    }
}

impl<T: Linked<Links<T>> + ?Sized> Drop for Drain<T> {
    fn drop(&mut self) {
        for handle in self {
            drop(handle);
        }
    }
}

impl<T: Linked<Links<T>> + ?Sized> fmt::Debug for Drain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drain")
            .field("next", &self.next)
            .finish()
    }
}

/// The chain is exclusively owned by the `Drain`; moving it to another
/// thread moves ownership of every element in it.
unsafe impl<T> Send for Drain<T>
where
    T: Send + Linked<Links<T>> + ?Sized,
    T::Handle: Send,
{
}

// === the link protocol ===

/// Links `node` in immediately after `anchor` (which may be a head or an
/// element).
///
/// `node`'s words are caller-owned and overwritten without being claimed.
#[cfg_attr(feature = "no-inline", inline(never))]
unsafe fn link_after<T: ?Sized>(anchor: NonNull<Links<T>>, node: NonNull<Links<T>>) {
    let mut boff = Backoff::new();
    loop {
        // Claim the link from the anchor to its successor, front word
        // first.
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

        // The node is not yet reachable, so plain ordering suffices for
        // its own words; the releasing stores below publish them.
        links(node).next.store(succ.as_ptr(), Relaxed);
        links(node).prev.store(anchor.as_ptr(), Relaxed);
        links(succ).unlock_prev(node.as_ptr());
        links(anchor).unlock_next(node.as_ptr());
        test_trace!(anchor = ?anchor, node = ?node, "link_after -> linked");
        return;
    }
}

/// Links `node` in immediately before `anchor` (which may be a head or an
/// element).
///
/// The anchor's *backward* word is claimed before the predecessor's
/// forward word. This order matters: it means no thread ever owns a tail's
/// `next` word without owning the head's `prev` word, which is what lets
/// [`List::take_all_unchecked`] rewrite the tail's `next` while holding
/// only the head's two words.
#[cfg_attr(feature = "no-inline", inline(never))]
unsafe fn link_before<T: ?Sized>(anchor: NonNull<Links<T>>, node: NonNull<Links<T>>) {
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

        links(node).next.store(anchor.as_ptr(), Relaxed);
        links(node).prev.store(pred.as_ptr(), Relaxed);
        links(anchor).unlock_prev(node.as_ptr());
        links(pred).unlock_next(node.as_ptr());
        test_trace!(anchor = ?anchor, node = ?node, "link_before -> linked");
        return;
    }
}

/// The result of attempting to claim both of an unlinked node's own words.
enum OwnUnlinked<T: ?Sized> {
    /// Both words are claimed; the raw values are remembered for rollback.
    Owned {
        raw_prev: *mut Links<T>,
        raw_next: *mut Links<T>,
    },
    /// Another thread owns one of the words.
    Busy,
    /// The node is linked into a list.
    Linked,
}

/// Attempts to take ownership of both words of a node expected to be
/// unlinked.
unsafe fn try_own_unlinked<T: ?Sized>(node: NonNull<Links<T>>) -> OwnUnlinked<T> {
    let Some(raw_prev) = links(node).lock_prev() else {
        return OwnUnlinked::Busy;
    };
    if or_self(node, raw_prev) != node {
        links(node).unlock_prev(raw_prev);
        return OwnUnlinked::Linked;
    }
    let Some(raw_next) = links(node).lock_next() else {
        links(node).unlock_prev(raw_prev);
        return OwnUnlinked::Busy;
    };
    if or_self(node, raw_next) != node {
        links(node).unlock_next(raw_next);
        links(node).unlock_prev(raw_prev);
        return OwnUnlinked::Linked;
    }
    OwnUnlinked::Owned { raw_prev, raw_next }
}

/// Links `node` in after `anchor` only if `node` is currently unlinked.
///
/// The node's own words are claimed before the anchor link is touched, so
/// the common failure (the node is already in a list) is detected without
/// contending on the anchor, and so that racing `try_link`s of one shared
/// node settle on exactly one winner.
#[cfg_attr(feature = "no-inline", inline(never))]
unsafe fn try_link_after<T: ?Sized>(anchor: NonNull<Links<T>>, node: NonNull<Links<T>>) -> bool {
    let mut boff = Backoff::new();
    loop {
        let (raw_nprev, raw_nnext) = match try_own_unlinked(node) {
            OwnUnlinked::Owned { raw_prev, raw_next } => (raw_prev, raw_next),
            OwnUnlinked::Busy => {
                boff.spin();
                continue;
            }
            OwnUnlinked::Linked => return false,
        };

        let Some(raw_next) = links(anchor).lock_next() else {
            links(node).unlock_next(raw_nnext);
            links(node).unlock_prev(raw_nprev);
            boff.spin();
            continue;
        };
        let succ = or_self(anchor, raw_next);
        let Some(raw_sp) = links(succ).lock_prev() else {
            links(anchor).unlock_next(raw_next);
            links(node).unlock_next(raw_nnext);
            links(node).unlock_prev(raw_nprev);
            boff.spin();
            continue;
        };
        debug_assert_eq!(or_self(succ, raw_sp), anchor);

        // All four words are owned: the node's own words commit with
        // releasing stores, unlike the trusting variant's plain ones.
        links(node).unlock_next(succ.as_ptr());
        links(node).unlock_prev(anchor.as_ptr());
        links(succ).unlock_prev(node.as_ptr());
        links(anchor).unlock_next(node.as_ptr());
        return true;
    }
}

/// Links `node` in before `anchor` only if `node` is currently unlinked.
#[cfg_attr(feature = "no-inline", inline(never))]
unsafe fn try_link_before<T: ?Sized>(anchor: NonNull<Links<T>>, node: NonNull<Links<T>>) -> bool {
    let mut boff = Backoff::new();
    loop {
        let (raw_nprev, raw_nnext) = match try_own_unlinked(node) {
            OwnUnlinked::Owned { raw_prev, raw_next } => (raw_prev, raw_next),
            OwnUnlinked::Busy => {
                boff.spin();
                continue;
            }
            OwnUnlinked::Linked => return false,
        };

        let Some(raw_prev) = links(anchor).lock_prev() else {
            links(node).unlock_next(raw_nnext);
            links(node).unlock_prev(raw_nprev);
            boff.spin();
            continue;
        };
        let pred = or_self(anchor, raw_prev);
        let Some(raw_pn) = links(pred).lock_next() else {
            links(anchor).unlock_prev(raw_prev);
            links(node).unlock_next(raw_nnext);
            links(node).unlock_prev(raw_nprev);
            boff.spin();
            continue;
        };
        debug_assert_eq!(or_self(pred, raw_pn), anchor);

        links(node).unlock_next(anchor.as_ptr());
        links(node).unlock_prev(pred.as_ptr());
        links(anchor).unlock_prev(node.as_ptr());
        links(pred).unlock_next(node.as_ptr());
        return true;
    }
}

/// The result of [`cut_around`].
enum CutAround<T: ?Sized> {
    /// The node was observed unlinked; nothing is claimed.
    Unlinked,
    /// The node is fully isolated: `prev.next`, `next.prev`, and both of
    /// the node's own words hold the sentinel, claimed by the caller.
    Cut {
        prev: NonNull<Links<T>>,
        next: NonNull<Links<T>>,
    },
}

/// Claims all four words surrounding `node`, fully isolating it from its
/// ring.
///
/// Claim order: the predecessor's forward word, the successor's backward
/// word, then the node's own words. Navigation reads are unclaimed and may
/// be stale; each claim is verified against the ring shape and rolls the
/// whole attempt back on a mismatch.
#[cfg_attr(feature = "no-inline", inline(never))]
unsafe fn cut_around<T: ?Sized>(node: NonNull<Links<T>>) -> CutAround<T> {
    let mut boff = Backoff::new();
    loop {
        let raw_prev = links(node).prev.load(Relaxed);
        if raw_prev == busy() {
            boff.spin();
            continue;
        }
        let pred = or_self(node, raw_prev);
        if pred == node {
            return CutAround::Unlinked;
        }

        let Some(raw_pn) = links(pred).lock_next() else {
            boff.spin();
            continue;
        };
        if or_self(pred, raw_pn) != node {
            // the navigation read was stale; this is no longer our
            // predecessor.
            links(pred).unlock_next(raw_pn);
            boff.spin();
            continue;
        }

        let raw_next = links(node).next.load(Relaxed);
        if raw_next == busy() {
            links(pred).unlock_next(raw_pn);
            boff.spin();
            continue;
        }
        let succ = or_self(node, raw_next);
        if succ == node {
            links(pred).unlock_next(raw_pn);
            boff.spin();
            continue;
        }
        let Some(raw_sp) = links(succ).lock_prev() else {
            links(pred).unlock_next(raw_pn);
            boff.spin();
            continue;
        };
        if or_self(succ, raw_sp) != node {
            links(succ).unlock_prev(raw_sp);
            links(pred).unlock_next(raw_pn);
            boff.spin();
            continue;
        }

        let Some(raw_np) = links(node).lock_prev() else {
            links(succ).unlock_prev(raw_sp);
            links(pred).unlock_next(raw_pn);
            boff.spin();
            continue;
        };
        debug_assert_eq!(or_self(node, raw_np), pred);
        let Some(raw_nn) = links(node).lock_next() else {
            links(node).unlock_prev(raw_np);
            links(succ).unlock_prev(raw_sp);
            links(pred).unlock_next(raw_pn);
            boff.spin();
            continue;
        };
        debug_assert_eq!(or_self(node, raw_nn), succ);

        return CutAround::Cut { prev: pred, next: succ };
    }
}
