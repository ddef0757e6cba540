// Copyright 2024 RisingLight Project Authors. Licensed under Apache-2.0.

//! The host-facing aggregate function object.
//!
//! A query engine owns one [`StringAgg`] per partial aggregate and drives
//! it through initialize → accumulate/merge → terminate. The engine
//! contract promises that ordering; this layer checks it anyway, so a
//! violation fails loudly instead of corrupting the group result.

use tracing::warn;

use crate::codec;
use crate::error::{Error, Result};
use crate::state::StringAggState;

/// Registration metadata for the host engine.
///
/// Expressed as an explicit struct rather than attached framework
/// attributes, so an engine can read it when declaring the function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggProperties {
    /// Whether dropping duplicate input values would leave the result
    /// unchanged.
    pub invariant_to_duplicates: bool,
    /// Whether null inputs leave the result unchanged.
    pub invariant_to_nulls: bool,
    /// Whether reordering the input rows would leave the result
    /// unchanged.
    pub invariant_to_order: bool,
    /// Whether an empty group produces a null result.
    pub null_if_empty: bool,
}

/// Fragment capacity reserved by [`StringAgg::initialize`].
///
/// Large enough that a high-cardinality group appends without
/// reallocation. A performance hint only; correctness never depends on
/// it.
pub const ROW_CAPACITY_HINT: usize = 102_400;

enum Lifecycle {
    Uninitialized,
    Accumulating(StringAggState),
    Terminated,
}

impl Lifecycle {
    fn name(&self) -> &'static str {
        match self {
            Lifecycle::Uninitialized => "uninitialized",
            Lifecycle::Accumulating(_) => "accumulating",
            Lifecycle::Terminated => "terminated",
        }
    }
}

/// The `string_agg` aggregate as the query engine drives it.
///
/// Concatenates every non-null input value in accumulation order, each
/// followed by its per-row delimiter except the last. Partial aggregates
/// are combined with [`merge`](Self::merge) or shipped through
/// [`to_bytes`](Self::to_bytes) / [`from_bytes`](Self::from_bytes).
pub struct StringAgg {
    lifecycle: Lifecycle,
}

impl Default for StringAgg {
    fn default() -> Self {
        Self::new()
    }
}

impl StringAgg {
    /// Metadata a host engine needs to register this aggregate: every
    /// duplicate counts, nulls are ignored without nulling the result,
    /// input order shows in the output, and an empty group is NULL.
    pub const PROPERTIES: AggProperties = AggProperties {
        invariant_to_duplicates: false,
        invariant_to_nulls: true,
        invariant_to_order: false,
        null_if_empty: true,
    };

    /// Creates an aggregate that has not been initialized yet.
    pub fn new() -> Self {
        Self {
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Wraps an existing partial state.
    pub fn from_state(state: StringAggState) -> Self {
        Self {
            lifecycle: Lifecycle::Accumulating(state),
        }
    }

    /// Resets to the empty accumulating state.
    ///
    /// Hosts recycle aggregate instances, so this is legal in any state;
    /// resetting away accumulated fragments is tolerated but logged.
    pub fn initialize(&mut self) {
        if let Lifecycle::Accumulating(state) = &self.lifecycle {
            if !state.is_empty() {
                warn!(
                    "string_agg: initialize discarded {} accumulated fragments",
                    state.len()
                );
            }
        }
        self.lifecycle =
            Lifecycle::Accumulating(StringAggState::with_row_capacity(ROW_CAPACITY_HINT));
    }

    /// Feeds one row of (nullable value, nullable delimiter).
    pub fn accumulate(&mut self, value: Option<&str>, separator: Option<&str>) -> Result<()> {
        self.expect_state_mut("accumulate")?
            .accumulate(value, separator);
        Ok(())
    }

    /// Absorbs a sibling partial aggregate, appending its fragments after
    /// the receiver's. The sibling is consumed and must itself be
    /// accumulating.
    pub fn merge(&mut self, other: StringAgg) -> Result<()> {
        let state = self.expect_state_mut("merge")?;
        match other.lifecycle {
            Lifecycle::Accumulating(other_state) => {
                state.merge(other_state);
                Ok(())
            }
            other_lifecycle => Err(Error::invalid_sequence("merge", other_lifecycle.name())),
        }
    }

    /// Serializes the partial state for spilling or shipping.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        codec::encode(self.expect_state("serialize")?)
    }

    /// Reconstructs a shipped partial state, ready for further
    /// accumulate, merge and terminate calls.
    pub fn from_bytes(buf: &[u8]) -> Result<StringAgg> {
        Ok(Self::from_state(codec::decode(buf)?))
    }

    /// Produces the final result and retires the aggregate. `None` when
    /// no non-null value was ever accumulated.
    pub fn terminate(&mut self) -> Result<Option<String>> {
        match std::mem::replace(&mut self.lifecycle, Lifecycle::Terminated) {
            Lifecycle::Accumulating(state) => Ok(state.output()),
            other => {
                let err = Error::invalid_sequence("terminate", other.name());
                // a failed terminate must not change the observable state
                self.lifecycle = other;
                Err(err)
            }
        }
    }

    fn expect_state(&self, op: &'static str) -> Result<&StringAggState> {
        match &self.lifecycle {
            Lifecycle::Accumulating(state) => Ok(state),
            other => Err(Error::invalid_sequence(op, other.name())),
        }
    }

    fn expect_state_mut(&mut self, op: &'static str) -> Result<&mut StringAggState> {
        match &mut self.lifecycle {
            Lifecycle::Accumulating(state) => Ok(state),
            other => Err(Error::invalid_sequence(op, other.name())),
        }
    }
}
