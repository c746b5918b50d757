//! Small async runtime helpers shared by the piece store endpoint.
//!
//! Pulled out of the endpoint crate so that task-spawning and timeout
//! bookkeeping can be unit tested in isolation from the RPC handlers.

mod spawn;
pub use spawn::{Cancelled, JoinError, Spawner, Stats, Task};

mod time;
pub use time::{sleep, timeout, Elapsed};
