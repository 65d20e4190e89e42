pub(crate) use self::inner::*;


#[cfg(not(all(test, loom)))]
mod inner {
    #![allow(dead_code)]

    pub(crate) use core::sync::atomic;


    #[cfg(test)]
    pub(crate) use std::thread;

    pub(crate) mod hint {
        pub(crate) use core::hint::spin_loop;
    }

    pub(crate) mod alloc {
        use core::fmt;

        /// Track allocations, detecting leaks.
        ///
        /// No-op outside of loom; exists so test code is identical under
        /// both schedulers.
        #[derive(Default)]
        pub(crate) struct Track<T> {
            value: T,
        }

        impl<T> Track<T> {
            /// Track a value for leaks.
            #[inline(always)]
            pub(crate) fn new(value: T) -> Track<T> {
                Track { value }
            }

            /// Get a reference to the value.
            #[inline(always)]
            pub(crate) fn get_ref(&self) -> &T {
                &self.value
            }

            /// Stop tracking the value for leaks.
            #[inline(always)]
            pub(crate) fn into_inner(self) -> T {
                self.value
            }
        }

        impl<T: fmt::Debug> fmt::Debug for Track<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.value.fmt(f)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn traceln(args: core::fmt::Arguments) {
        eprintln!("{}", args);
    }
}
