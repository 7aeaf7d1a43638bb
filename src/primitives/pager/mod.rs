#![forbid(unsafe_code)]

mod frame;
mod freelist;
mod meta;
mod pager;

pub use meta::Meta;
pub use pager::{
    CheckpointMode, PageMut, PageRef, PageStore, Pager, PagerOptions, PagerStats, ReadGuard,
    Synchronous, WriteGuard,
};
