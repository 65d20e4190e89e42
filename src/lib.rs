#![cfg_attr(docsrs, doc = include_str!("../README.md"))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, deny(missing_docs))]
#![cfg_attr(not(any(feature = "std", test)), no_std)]
#![allow(unused_unsafe)]
//!
//! ## what's all this, then?
//!
//! `hyphae` provides **[`List`]: a multi-thread-aware [intrusive] circular
//! doubly-linked list**.
//!
//! Unlike a list protected by a single mutex, a [`List`] is locked one
//! *link* at a time: a thread inserting, removing, or walking takes
//! exclusive ownership of only the two or four pointer words surrounding
//! the position it is operating on, by atomically swapping a reserved
//! sentinel value into each word. Operations on distant portions of the
//! same list proceed in parallel without contending. When two threads do
//! collide on a link, one of them restores every word it had claimed,
//! backs off with an exponential delay, and retries, so every operation
//! eventually commits.
//!
//! On top of the basic queue-ish surface ([`List::push_front`],
//! [`List::push_back`], [`List::pop_front`], [`List::take_all`], and
//! friends), the same link-locking protocol powers:
//!
//! - **concurrent traversal with in-place removal**: [`List::cursor`]
//!   yields each element while holding it temporarily isolated from the
//!   rest of the ring, so the cursor's owner may inspect it, keep it, or
//!   [remove it](list::Cursor::remove_current), all while other threads
//!   keep pushing, popping, and cursoring elsewhere in the list;
//! - **surgical splicing**: [`list::Gap`] and [`list::Isolated`] expose
//!   the cut-and-reconnect steps the higher-level operations are built
//!   from, for callers that need to hold a position open or move an
//!   element between lists.
//!
//! In order to be part of a [`List`], a type `T` must implement [`Linked`]
//! for [`list::Links<T>`].
//!
//! [intrusive]: #intrusive-data-structures
//!
//! ## intrusive data structures
//!
//! In an intrusive collection, the pointers that link participants
//! together are stored *inside* the participating elements, rather than in
//! nodes the collection allocates. This means a [`List`] performs no
//! allocation of its own: an element can be added to a list by any code
//! that owns a heap- or arena-allocated value containing a
//! [`list::Links`] field, including in `no_std` environments (the `alloc`
//! feature is only needed for [`List::new`]'s owned head; a `static` head
//! works without it).
//!
//! The price of admission is the [`Linked`] trait, which is unsafe to
//! implement: the implementor promises that elements stay pinned while
//! linked, and teaches the list how to translate between an element, its
//! owning handle, and its embedded links. See the [`Linked`]
//! documentation for details.
//!
//! ## caveats
//!
//! - The list is *circular*: the head is itself a node in the ring. An
//!   empty list is a head linked to itself.
//! - Progress under contention is probabilistic: conflicting operations
//!   roll back and retry with exponential backoff rather than queueing.
//!   This makes uncontended operations very cheap, but provides no
//!   fairness guarantee.
//! - Element storage is only reclaimed by dropping the
//!   [`Handle`](Linked::Handle) an operation hands back. The list never
//!   frees an element it still links.
#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(test)]
extern crate std;

#[macro_use]
pub(crate) mod util;

pub mod list;

#[doc(inline)]
pub use list::{Links, List};

pub(crate) mod loom;

use core::ptr::NonNull;

/// Trait implemented by types which can be members of a [`List`].
///
/// A member type must contain a [`list::Links`] field storing the pointers
/// that tie it into the ring, and must describe three translations:
///
/// - between an owning [`Handle`](Self::Handle) and a raw element pointer
///   ([`into_ptr`](Self::into_ptr) / [`from_ptr`](Self::from_ptr)),
/// - from an element pointer to its links field ([`links`](Self::links)),
/// - from a links pointer back to the enclosing element
///   ([`from_links`](Self::from_links)).
///
/// The last of these exists because ring pointers address the `Links`
/// structures themselves, not the elements: the list's head is a bare
/// [`list::Links`] with no enclosing element, and it participates in the
/// ring exactly like every member does.
///
/// # Safety
///
/// This is unsafe to implement because it's the implementation's
/// responsibility to ensure that types implementing this trait are valid
/// list members. In particular:
///
/// - Implementations **must** ensure that implementors are pinned in
///   memory while they are linked into a list. A linked element may not be
///   deallocated or moved to a different memory location.
/// - The type implementing this trait **must not** implement [`Unpin`].
/// - [`links`](Self::links) and [`from_links`](Self::from_links) **must**
///   round-trip exactly: `from_links(links(e)) == e` for every element
///   pointer `e`.
///
/// Failure to uphold these invariants will result in corruption of the
/// list, including dangling pointers.
///
/// # Implementing `Linked::links` and `Linked::from_links`
///
/// Suppose we have an entry type like this:
///
/// ```rust
/// use hyphae::list;
///
/// struct Entry {
///     links: list::Links<Self>,
///     data: usize,
/// }
/// ```
///
/// The two field translations must be written without materializing a
/// reference to the whole `Entry` (which would be unsound under [Stacked
/// Borrows] while other pointers to the entry exist). Going from the
/// entry to the field, use the [`core::ptr::addr_of_mut!`] macro; going
/// from the field back to the entry, subtract the field's offset from the
/// raw address:
///
/// ```
/// use core::{mem, ptr::{self, NonNull}};
/// use hyphae::{Linked, list};
/// # struct Entry {
/// #    links: list::Links<Self>,
/// # }
///
/// unsafe impl Linked<list::Links<Self>> for Entry {
///     # type Handle = NonNull<Self>;
///     # fn into_ptr(r: Self::Handle) -> NonNull<Self> { r }
///     # unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle { ptr }
///     // ...
///
///     unsafe fn links(target: NonNull<Self>) -> NonNull<list::Links<Self>> {
///         // Offset the raw pointer to a raw pointer to the field,
///         // *without* creating a temporary reference.
///         let links = ptr::addr_of_mut!((*target.as_ptr()).links);
///
///         // `NonNull::new_unchecked` is safe to use here, because the
///         // pointer that we offset was not null, implying that the
///         // pointer produced by offsetting it will also not be null.
///         NonNull::new_unchecked(links)
///     }
///
///     unsafe fn from_links(links: NonNull<list::Links<Self>>) -> NonNull<Self> {
///         // Walk backwards over the same offset `links` walked forwards.
///         let entry = links
///             .as_ptr()
///             .byte_sub(mem::offset_of!(Self, links))
///             .cast::<Self>();
///         NonNull::new_unchecked(entry)
///     }
/// }
/// ```
///
/// Both functions must name the *same* field, or the round-trip
/// requirement is violated. If the links field is the first field of a
/// `#[repr(C)]` struct, the offset is zero and both directions reduce to
/// pointer casts, but spelling the offset out as above is recommended:
/// it keeps working when fields are reordered, and permits an element to
/// carry links for more than one list.
///
/// [Stacked Borrows]: https://github.com/rust-lang/unsafe-code-guidelines/blob/master/wip/stacked-borrows.md
pub unsafe trait Linked<L> {
    /// The handle owning elements of the list.
    ///
    /// This type must have ownership over a `Self`-typed value. When a
    /// `Handle` is dropped, it should drop the corresponding `Linked`
    /// type.
    ///
    /// A quintessential example of a `Handle` is [`Box`]; a shared handle
    /// such as a pinned [`Arc`] also works, and makes the
    /// [`try_push`](List::try_push_front) operations meaningful (an
    /// element reachable from several places may or may not already be in
    /// a list).
    ///
    /// [`Box`]: alloc::boxed::Box
    /// [`Arc`]: alloc::sync::Arc
    type Handle;

    /// Convert a [`Self::Handle`] to a raw pointer to `Self`, taking
    /// ownership of it in the process.
    fn into_ptr(r: Self::Handle) -> NonNull<Self>;

    /// Convert a raw pointer to `Self` into an owning [`Self::Handle`].
    ///
    /// # Safety
    ///
    /// This function is safe to call when:
    /// - It is valid to construct a [`Self::Handle`] from a raw pointer.
    /// - The pointer points to a valid instance of `Self` (e.g. it does
    ///   not dangle).
    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle;

    /// Return the links of the element pointed to by `ptr`.
    ///
    /// # Safety
    ///
    /// The pointer must point to a valid instance of `Self` (e.g. it does
    /// not dangle).
    ///
    /// See [the trait-level documentation](#implementing-linkedlinks-and-linkedfrom_links)
    /// for details on how to correctly implement this method.
    unsafe fn links(ptr: NonNull<Self>) -> NonNull<L>;

    /// Return the element whose links field `links` points to.
    ///
    /// This is the inverse of [`links`](Self::links); the two must
    /// round-trip exactly.
    ///
    /// # Safety
    ///
    /// The pointer must have been produced by [`links`](Self::links) (or
    /// be otherwise known to address the links field of a valid `Self`);
    /// in particular it must **not** address a list head, which has no
    /// enclosing element.
    ///
    /// See [the trait-level documentation](#implementing-linkedlinks-and-linkedfrom_links)
    /// for details on how to correctly implement this method.
    unsafe fn from_links(links: NonNull<L>) -> NonNull<Self>;
}
