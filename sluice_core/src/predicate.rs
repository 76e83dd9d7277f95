//! Per-consumer selection predicates.
//!
//! A predicate decides, from an item's type alone, whether the consumer
//! wants the item delivered, skipped, or down-sampled. It is consulted
//! after peeking only the fixed item prefix, so a rejected item never pays
//! a payload copy — the consumer advances past it with a size-only skip.
//!
//! Each predicate is owned by exactly one consumer handle; sampling
//! counters are per-consumer state, not shared.

use std::collections::BTreeMap;

/// What to do with an item of a given type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Never deliver items of this type.
    AlwaysExclude,
    /// Deliver every k-th occurrence (the 1st, k+1-th, ...), skip the rest.
    SampleEveryK(u32),
}

/// Keep-or-skip verdict for one concrete item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Deliver,
    Skip,
}

#[derive(Debug, Clone)]
struct Exception {
    mode: SampleMode,
    /// Occurrences of this type seen so far; drives the sampling phase.
    seen: u64,
}

/// Ordered set of type exceptions. Default with no exceptions configured:
/// deliver everything.
#[derive(Debug, Clone, Default)]
pub struct Predicate {
    exceptions: BTreeMap<u32, Exception>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always skip items of `item_type`.
    pub fn add_exception(&mut self, item_type: u32) -> &mut Self {
        self.exceptions.insert(
            item_type,
            Exception {
                mode: SampleMode::AlwaysExclude,
                seen: 0,
            },
        );
        self
    }

    /// Deliver every `k`-th item of `item_type` and skip the remainder.
    /// `k` of 0 is treated as 1 (deliver everything of the type).
    pub fn add_sampled(&mut self, item_type: u32, k: u32) -> &mut Self {
        self.exceptions.insert(
            item_type,
            Exception {
                mode: SampleMode::SampleEveryK(k.max(1)),
                seen: 0,
            },
        );
        self
    }

    /// Drop any exception for `item_type`, restoring default delivery.
    pub fn remove_exception(&mut self, item_type: u32) -> &mut Self {
        self.exceptions.remove(&item_type);
        self
    }

    /// The configured exceptions, in type order.
    pub fn exceptions(&self) -> impl Iterator<Item = (u32, SampleMode)> + '_ {
        self.exceptions.iter().map(|(t, e)| (*t, e.mode))
    }

    pub fn is_empty(&self) -> bool {
        self.exceptions.is_empty()
    }

    /// Decide the fate of the next occurrence of `item_type`, advancing the
    /// sampling counter for that type.
    pub fn decide(&mut self, item_type: u32) -> Decision {
        match self.exceptions.get_mut(&item_type) {
            None => Decision::Deliver,
            Some(e) => match e.mode {
                SampleMode::AlwaysExclude => Decision::Skip,
                SampleMode::SampleEveryK(k) => {
                    let nth = e.seen;
                    e.seen += 1;
                    if nth % k as u64 == 0 {
                        Decision::Deliver
                    } else {
                        Decision::Skip
                    }
                }
            },
        }
    }
}
