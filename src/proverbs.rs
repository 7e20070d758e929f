//! The fixed set of proverbs and the per-session random picker.
//!
//! A `ProverbSet` is built once at startup and shared read-only by every
//! session (cloning it only bumps a refcount). Each session gets its own
//! `ProverbSource`, so picking never takes a lock and two clients never walk
//! the same random sequence.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

const GO_PROVERBS: &[&str] = &[
    "Don't communicate by sharing memory, share memory by communicating.",
    "Concurrency is not parallelism.",
    "Channels orchestrate; mutexes serialize.",
    "The bigger the interface, the weaker the abstraction.",
    "Make the zero value useful.",
    "interface{} says nothing.",
    "Gofmt's style is no one's favorite, yet gofmt is everyone's favorite.",
    "A little copying is better than a little dependency.",
    "Syscall must always be guarded with build tags.",
    "Cgo must always be guarded with build tags.",
    "Cgo is not Go.",
    "With the unsafe package there are no guarantees.",
    "Clear is better than clever.",
    "Reflection is never clear.",
    "Errors are values.",
    "Don't just check errors, handle them gracefully.",
    "Design the architecture, name the components, document the details.",
    "Documentation is for users.",
    "Don't panic.",
];

/// An immutable, never-empty list of proverbs.
#[derive(Debug, Clone)]
pub struct ProverbSet {
    proverbs: Arc<[String]>,
}

impl ProverbSet {
    pub fn new<I, S>(proverbs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let proverbs: Arc<[String]> = proverbs.into_iter().map(Into::into).collect();
        if proverbs.is_empty() {
            return Err(Error::EmptyProverbSet);
        }
        Ok(Self { proverbs })
    }

    /// The nineteen Go proverbs the server ships with.
    pub fn go_proverbs() -> Self {
        Self {
            proverbs: GO_PROVERBS.iter().map(|&p| p.to_owned()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.proverbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proverbs.is_empty()
    }

    pub fn contains(&self, proverb: &str) -> bool {
        self.proverbs.iter().any(|p| p == proverb)
    }
}

/// Picks proverbs uniformly at random, with replacement.
#[derive(Debug)]
pub struct ProverbSource {
    proverbs: ProverbSet,
    rng: StdRng,
}

impl ProverbSource {
    pub fn new(proverbs: ProverbSet, seed: u64) -> Self {
        Self {
            proverbs,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seed from the clock, mixed with the session id. Sessions accepted in
    /// the same nanosecond still get different sequences.
    pub fn for_session(proverbs: ProverbSet, session_id: u64) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::new(proverbs, nanos ^ session_id.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    pub fn pick(&mut self) -> &str {
        // ProverbSet::new guarantees len() >= 1, so the range is never empty.
        let index = self.rng.random_range(0..self.proverbs.len());
        &self.proverbs.proverbs[index]
    }
}
