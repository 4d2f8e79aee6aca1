//! Pipeline workers.
//!
//! Each worker is an independent, stateless invocation: the ingester and
//! backfill run as one-shot jobs, the identification worker consumes one
//! queue message at a time, the health sampler loops until no unverified
//! release remains. Ordering between invocations exists only through the
//! store's per-item state.

pub mod backfill;
pub mod health;
pub mod identify;
pub mod ingest;
pub mod reconcile;

#[cfg(test)]
pub(crate) mod testing;
