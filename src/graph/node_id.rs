use std::num::NonZero;

/// Generate a compact ID type which indexes an arena in a [`Graph`](super::Graph).
///
/// IDs are stored as `index + 1` so that `Option<Id>` is the same size as
/// `Id`.
macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(NonZero<u32>);

        impl $name {
            /// Return the underlying u32 value of the ID.
            pub fn as_u32(self) -> u32 {
                self.0.get() - 1
            }

            /// Return the underlying ID value as a usize, for slice indexing.
            pub fn as_usize(self) -> usize {
                self.as_u32() as usize
            }

            /// Construct an ID from a u32 value.
            ///
            /// Panics if the value is `u32::MAX`.
            pub fn from_u32(value: u32) -> $name {
                assert!(value < u32::MAX);
                $name(NonZero::<u32>::MIN.saturating_add(value))
            }

            pub(crate) fn from_index(index: usize) -> $name {
                assert!(index < u32::MAX as usize);
                $name::from_u32(index as u32)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.as_u32().fmt(f)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.as_u32())
            }
        }
    };
}

arena_id!(
    /// ID of a node in a [`Graph`](super::Graph).
    NodeId
);

arena_id!(
    /// ID of a function (sub-graph) in a [`Graph`](super::Graph).
    FunctionId
);

#[cfg(test)]
mod tests {
    use super::{FunctionId, NodeId};

    #[test]
    fn test_id_round_trip() {
        let id = NodeId::from_u32(5);
        assert_eq!(id.as_u32(), 5);
        assert_eq!(id.as_usize(), 5);
        assert_eq!(id.to_string(), "5");
        assert_eq!(format!("{:?}", FunctionId::from_u32(2)), "FunctionId(2)");
        assert_eq!(
            std::mem::size_of::<Option<NodeId>>(),
            std::mem::size_of::<NodeId>()
        );
    }
}
