//! Byte-rate limiting and quota evaluation for the bridge's copy pump.
//!
//! Nothing in the teacher repo rate-limits a data plane (its transports
//! all run uncapped), so this bucket is built from scratch in the
//! ambient idiom used elsewhere in the workspace: a `Mutex`-guarded
//! refill state plus a `Notify` so a rate change (dynamic throttling)
//! wakes anyone already waiting instead of making them sit out their old
//! sleep interval. `governor` was considered — it's already in this
//! corpus's dependency graph via `holochain`'s sync `check_n` API — but
//! its wait path isn't cancellable on an async context the way
//! `WaitN(ctx, n)` needs to be, so a small bucket purpose-built for this
//! contract is the better fit.

pub mod bucket;
pub mod quota;

pub use bucket::{RateLimitError, TokenBucket};
pub use quota::{QuotaController, QuotaStatus};
