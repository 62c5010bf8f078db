//! Routing guard
//!
//! Applied to every directive, whichever supervisor produced it. The guard
//! can only turn a specialist directive into FINISH, never the reverse.

use super::{last_speaker, turn_speakers};
use crate::models::{Message, RoutingDirective, Specialist};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardVerdict {
    pub directive: RoutingDirective,
    /// Why the proposal was replaced with FINISH
    pub overridden: Option<&'static str>,
}

impl GuardVerdict {
    fn keep(directive: RoutingDirective) -> Self {
        Self {
            directive,
            overridden: None,
        }
    }

    fn finish(reason: &'static str) -> Self {
        Self {
            directive: RoutingDirective::Finish,
            overridden: Some(reason),
        }
    }
}

pub fn enforce(history: &[Message], proposed: RoutingDirective) -> GuardVerdict {
    let verdict = check(history, proposed);
    if let Some(reason) = verdict.overridden {
        warn!(proposed = %proposed, reason = reason, "Routing guard forced FINISH");
    }
    verdict
}

fn check(history: &[Message], proposed: RoutingDirective) -> GuardVerdict {
    let Some(target) = proposed.specialist() else {
        return GuardVerdict::keep(proposed);
    };

    if history.last().map(Message::has_transaction_intent).unwrap_or(false) {
        return GuardVerdict::finish("transaction intent pending wallet confirmation");
    }

    if last_speaker(history) == Some(target) {
        return GuardVerdict::finish("specialist would answer its own message");
    }

    let speakers = turn_speakers(history);
    if target == Specialist::Analyst && speakers.contains(&Specialist::Executor) {
        return GuardVerdict::finish("no hand-off back from executor to analyst");
    }
    if speakers.contains(&target) {
        return GuardVerdict::finish("specialist already replied this turn");
    }

    GuardVerdict::keep(proposed)
}
