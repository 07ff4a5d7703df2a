//! Concurrency ceilings and the store lock.

pub mod lock;
pub mod policy;

pub use lock::{LockGuard, STATE_ACCESS, SemaphoreLock, TRIGGER_ACCESS};
pub use policy::{
    BucketLedger, Ceiling, ConcurrencyBucket, ConcurrencyDeclaration,
    ConcurrencyLimit, ConcurrencyPolicy,
};
