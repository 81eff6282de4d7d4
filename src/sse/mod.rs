pub mod models;
pub use models::*;

mod sse_broadcaster;
pub use sse_broadcaster::*;

mod poll_updates_sse;

pub use poll_updates_sse::poll_updates_sse;
