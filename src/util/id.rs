//! Process-unique object identifiers.

/// Declares a copyable identifier backed by a global counter.
macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub(crate) fn next() -> Self {
                static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
                $name(COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
            }

            #[allow(dead_code)]
            pub(crate) fn from_raw(raw: u64) -> Self {
                $name(raw)
            }

            /// Raw numeric value of this identifier.
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

pub(crate) use object_id;

#[cfg(test)]
mod tests {
    object_id!(TestId, "test");

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = TestId::next();
        let b = TestId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", TestId::from_raw(7)), "test#7");
    }
}
