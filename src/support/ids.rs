//-
// Copyright (c) 2026, The Mallard Authors
//
// This file is part of Mallard.
//
// Mallard is free software: you can  redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mallard is distributed  in the hope that it  will be useful,  but WITHOUT
// ANY  WARRANTY;  without  even  the implied  warranty of  MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Mallard. If not, see <http://www.gnu.org/licenses/>.

//! Injectable time and identifier sources.
//!
//! Sessions, the delivery pipeline, and the store never reach for ambient
//! time or ambient randomness; they are handed a `Clock` and an `IdSource`
//! at construction so that tests can substitute deterministic ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::prelude::*;
use rand::RngCore;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a fixed instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Source of opaque document and blob identifiers.
///
/// Identifiers are 24 lower-case hex digits, the same shape the original
/// document store uses, so they are safe in wire responses and URLs.
pub trait IdSource: Send + Sync {
    fn generate(&self) -> String;
}

/// The production id source: 12 random bytes, hex encoded.
#[derive(Debug, Default)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn generate(&self) -> String {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex(&bytes)
    }
}

/// Deterministic id source for tests: a fixed prefix and a counter.
#[derive(Debug, Default)]
pub struct SequentialIdSource {
    next: AtomicU64,
}

impl IdSource for SequentialIdSource {
    fn generate(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{:024x}", n)
    }
}

pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub type ArcClock = Arc<dyn Clock>;
pub type ArcIdSource = Arc<dyn IdSource>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sequential_ids_are_distinct_and_sized() {
        let ids = SequentialIdSource::default();
        let a = ids.generate();
        let b = ids.generate();
        assert_ne!(a, b);
        assert_eq!(24, a.len());
    }

    #[test]
    fn random_ids_are_hex() {
        let id = RandomIdSource.generate();
        assert_eq!(24, id.len());
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
