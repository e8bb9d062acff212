//! External services for the case aggregate.
//!
//! Services provide external dependencies (time, expression languages) to the
//! aggregate without coupling it to specific implementations.

use crate::domain::types::TimestampUtc;
use crate::expression::EvaluatorRegistry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Services injected into the case aggregate for command handling.
#[derive(Debug, Clone, Default)]
pub struct CaseServices {
    pub clock: CaseClock,
    pub evaluators: Arc<EvaluatorRegistry>,
}

impl CaseServices {
    pub fn new(evaluators: EvaluatorRegistry) -> Self {
        Self {
            clock: CaseClock::default(),
            evaluators: Arc::new(evaluators),
        }
    }

    pub fn with_clock(mut self, clock: CaseClock) -> Self {
        self.clock = clock;
        self
    }
}

/// Clock service for timestamp generation. A fixed clock keeps timer moments
/// predictable in tests.
#[derive(Debug, Clone, Default)]
pub struct CaseClock {
    fixed: Option<DateTime<Utc>>,
}

impl CaseClock {
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self { fixed: Some(at) }
    }

    /// Returns the current UTC timestamp.
    pub fn now(&self) -> TimestampUtc {
        match self.fixed {
            Some(at) => TimestampUtc(at),
            None => TimestampUtc::now(),
        }
    }
}
