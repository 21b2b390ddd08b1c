//! Job lifecycle: bounded pool, per-job worker, cancellation, recovery.
//!
//! One pool slot runs one worker for the whole life of a transfer, so
//! `max_concurrency` bounds how many transfers are tracked at once, not
//! request throughput. Workers suspend only on their poll timer.

mod cancellation;
mod pool;
mod recovery;
mod types;
mod worker;

pub use cancellation::CancellationRegistry;
pub use pool::{JobHandle, JobPool};
pub use recovery::{RecoveryLoader, RecoveryReport, SkipReason, SkippedJob};
pub use types::*;
pub use worker::TransferJobWorker;
