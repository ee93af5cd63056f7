//! Overload gate: sheds admitted work in proportion to pending demand.
//!
//! For each unit of work the gate reads the manager's overload ratio. A ratio
//! of zero always admits. Otherwise a uniform draw `check` in `[0, 1)` is taken
//! and the work is shed when `ratio > check`, so a ratio of 1.0 or more sheds
//! everything.

use std::sync::Arc;

use rand::Rng;

/// Source of uniform draws in `[0, 1)`.
pub trait Sampler: Send + Sync {
    fn sample(&self) -> f64;
}

/// Draws from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSampler;

impl Sampler for ThreadRngSampler {
    fn sample(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Admit,
    Shed { ratio: f64, check: f64 },
}

impl GateDecision {
    pub fn is_shed(&self) -> bool {
        matches!(self, GateDecision::Shed { .. })
    }
}

#[derive(Clone)]
pub struct OverloadGate {
    sampler: Arc<dyn Sampler>,
}

impl std::fmt::Debug for OverloadGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverloadGate").finish_non_exhaustive()
    }
}

impl Default for OverloadGate {
    fn default() -> Self {
        Self::new()
    }
}

impl OverloadGate {
    pub fn new() -> Self {
        Self::with_sampler(Arc::new(ThreadRngSampler))
    }

    pub fn with_sampler(sampler: Arc<dyn Sampler>) -> Self {
        Self { sampler }
    }

    pub fn decide(&self, overload_ratio: f64) -> GateDecision {
        if overload_ratio <= 0.0 {
            return GateDecision::Admit;
        }

        let check = self.sampler.sample();
        if overload_ratio > check {
            GateDecision::Shed {
                ratio: overload_ratio,
                check,
            }
        } else {
            GateDecision::Admit
        }
    }
}
