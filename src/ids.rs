//! Identity generator for canvas entities.
//!
//! Every image, row and annotation gets a random v4 UUID at creation time.
//! The newtypes keep the three id spaces from being mixed up at call sites.

use std::fmt;
use uuid::Uuid;

macro_rules! canvas_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                // Short form is plenty for log lines and texture names.
                let s = self.0.simple().to_string();
                write!(f, "{}", &s[..8])
            }
        }
    };
}

canvas_id!(
    /// Identifies one image on the canvas (uploads and generation results alike).
    ImageId
);
canvas_id!(
    /// Identifies one row (strip) of the grid.
    RowId
);
canvas_id!(
    /// Identifies one annotation on an image.
    AnnotationId
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_do_not_collide() {
        let ids: HashSet<ImageId> = (0..1000).map(|_| ImageId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn display_is_short_hex() {
        let id = RowId::new();
        let shown = id.to_string();
        assert_eq!(shown.len(), 8);
        assert!(id.as_uuid().simple().to_string().starts_with(&shown));
    }
}
