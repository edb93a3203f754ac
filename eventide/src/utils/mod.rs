//! Internal data structures.
//!
//! - [`Slab`]: indexed storage with reuse of freed slots,
//! - [`LinkedSlab`]: an insertion-ordered list on top of it, used for the
//!   listeners of broadcast streams.

mod list;
mod slab;

pub(crate) use list::LinkedSlab;
pub(crate) use slab::Slab;
