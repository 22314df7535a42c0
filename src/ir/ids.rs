//! Newtype IDs for the interchange dataset.
//!
//! Images, categories and annotations are numbered independently; the
//! newtypes stop one kind being passed where another is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! dataset_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            #[inline]
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            #[inline]
            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

dataset_id!(
    /// One exported raster: a single-frame image or one slice of a stack.
    ImageId
);
dataset_id!(
    /// Equal to the registry class id on export.
    CategoryId
);
dataset_id!(AnnotationId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_order_and_format() {
        assert!(ImageId(1) < ImageId(2));
        assert_eq!(format!("{:?}", CategoryId(3)), "CategoryId(3)");
        assert_eq!(AnnotationId::from(7).to_string(), "7");
    }
}
