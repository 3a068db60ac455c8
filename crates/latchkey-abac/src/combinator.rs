//! Conflict resolution across matching policies.
//!
//! Each matching policy votes its effect at its priority. A Deny vote wins
//! when its priority is at least the highest Allow priority, so an Allow and
//! a Deny at equal priority resolve to Deny. With no votes the decision is
//! the default Deny.

use latchkey_types::PolicyId;

use crate::evaluator::PolicyResult;
use crate::policy::Effect;

/// The outcome of combining all policy results for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedDecision {
    pub effect: Effect,
    /// The highest-priority matching policy of the winning effect, lowest id
    /// first among equals. `None` for the default deny.
    pub deciding_policy: Option<PolicyId>,
    pub reason: String,
}

impl CombinedDecision {
    pub fn is_allowed(&self) -> bool {
        self.effect == Effect::Allow
    }
}

/// Tracks the strongest vote seen for one effect.
#[derive(Debug, Default)]
struct Tally {
    highest: u32,
    matched: bool,
    leader: Option<PolicyId>,
}

impl Tally {
    fn vote(&mut self, result: &PolicyResult) {
        let replaces = match &self.leader {
            None => true,
            Some(leader) => {
                result.priority > self.highest
                    || (result.priority == self.highest && result.policy_id < *leader)
            }
        };
        if result.priority >= self.highest {
            self.highest = result.priority;
        }
        if replaces {
            self.leader = Some(result.policy_id.clone());
        }
        self.matched = true;
    }
}

/// Accumulates policy results into one decision.
#[derive(Debug, Default)]
pub struct DecisionCombinator {
    allow: Tally,
    deny: Tally,
}

impl DecisionCombinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one result. Non-matching results do not vote.
    pub fn record(&mut self, result: &PolicyResult) {
        if !result.matched {
            return;
        }
        match result.effect {
            Effect::Allow => self.allow.vote(result),
            Effect::Deny => self.deny.vote(result),
        }
    }

    /// Produces the final decision.
    pub fn decide(self) -> CombinedDecision {
        if self.deny.matched && self.deny.highest >= self.allow.highest {
            let reason = match &self.deny.leader {
                Some(id) => format!("denied by policy '{id}' (priority {})", self.deny.highest),
                None => "denied".to_string(),
            };
            return CombinedDecision {
                effect: Effect::Deny,
                deciding_policy: self.deny.leader,
                reason,
            };
        }
        if self.allow.matched {
            let reason = match &self.allow.leader {
                Some(id) => format!("allowed by policy '{id}' (priority {})", self.allow.highest),
                None => "allowed".to_string(),
            };
            return CombinedDecision {
                effect: Effect::Allow,
                deciding_policy: self.allow.leader,
                reason,
            };
        }
        CombinedDecision {
            effect: Effect::Deny,
            deciding_policy: None,
            reason: "no policy matched; default deny".to_string(),
        }
    }
}

/// Combines a batch of results.
pub fn combine<'a>(results: impl IntoIterator<Item = &'a PolicyResult>) -> CombinedDecision {
    let mut combinator = DecisionCombinator::new();
    for result in results {
        combinator.record(result);
    }
    combinator.decide()
}
