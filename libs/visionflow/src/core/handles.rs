//! Typed object handles.
//!
//! Handles are passive: cloning one never changes a count. Lifetime is
//! explicit through `retain` and `release`, mirroring the two-count
//! model in the reference table. A handle left over after its object
//! reached zero total count simply fails every call with
//! `InvalidReference`.

use crate::core::context::Context;
use crate::core::reference::RefId;

pub trait AsReference {
    fn ref_id(&self) -> RefId;
    fn context(&self) -> &Context;
}

/// Generic, kind-erased handle. Produced by delay slot lookup and
/// downcast with the `into_*` methods it exposes.
#[derive(Clone)]
pub struct Reference {
    pub(crate) ctx: Context,
    pub(crate) id: RefId,
}

impl AsReference for Reference {
    fn ref_id(&self) -> RefId {
        self.id
    }

    fn context(&self) -> &Context {
        &self.ctx
    }
}

macro_rules! object_handle {
    ($(#[$meta:meta])* $name:ident, $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            pub(crate) ctx: $crate::core::context::Context,
            pub(crate) id: $crate::core::reference::RefId,
        }

        impl $name {
            pub(crate) fn from_parts(
                ctx: $crate::core::context::Context,
                id: $crate::core::reference::RefId,
            ) -> Self {
                Self { ctx, id }
            }

            /// Bump the external count.
            pub fn retain(&self) -> $crate::core::error::Result<()> {
                self.ctx.retain_id(self.id, $crate::core::reference::CountKind::External)
            }

            /// Drop one external count. The object is destroyed when
            /// both counts reach zero.
            pub fn release(self) -> $crate::core::error::Result<()> {
                self.ctx.release_id(self.id, $crate::core::reference::CountKind::External)
            }

            pub fn is_valid(&self) -> bool {
                self.ctx
                    .check_kind(self.id, $crate::core::types::RefKind::$kind)
                    .is_ok()
            }

            pub fn set_name(&self, name: &str) -> $crate::core::error::Result<()> {
                self.ctx.set_ref_name(self.id, name)
            }

            pub fn name(&self) -> $crate::core::error::Result<Option<String>> {
                self.ctx.ref_name(self.id)
            }

            /// Snapshot of (external, internal) counts.
            pub fn counts(&self) -> $crate::core::error::Result<(u32, u32)> {
                self.ctx.ref_counts(self.id)
            }

            pub fn as_reference(&self) -> $crate::core::handles::Reference {
                $crate::core::handles::Reference { ctx: self.ctx.clone(), id: self.id }
            }
        }

        impl $crate::core::handles::AsReference for $name {
            fn ref_id(&self) -> $crate::core::reference::RefId {
                self.id
            }

            fn context(&self) -> &$crate::core::context::Context {
                &self.ctx
            }
        }
    };
}
pub(crate) use object_handle;
