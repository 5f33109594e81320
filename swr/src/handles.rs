mod futures;
mod sync;

pub use futures::AsyncSwrCache;
pub use sync::SwrCache;
