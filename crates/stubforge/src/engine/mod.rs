//! The matching algorithm and response generation.
//!
//! [`match_request`] is pure with respect to its inputs: the same store
//! snapshot, scenario states, and request always select the same winner.

pub mod proxy;
pub mod responder;
pub mod templating;

use crate::journal::PartialCandidate;
use crate::mapping::Mapping;
use crate::message::RequestMessage;
use crate::scenario::ScenarioEngine;
use crate::settings::ServerSettings;
use std::sync::Arc;
use tracing::trace;

/// How many partial candidates the log retains for diagnostics.
const PARTIAL_CANDIDATE_LIMIT: usize = 5;

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub winner: Option<Arc<Mapping>>,
    /// Best-scoring non-winners (score in (0,1]), strongest first.
    pub partial_candidates: Vec<PartialCandidate>,
}

/// Select the winning mapping for `request` from one store snapshot.
///
/// Candidates are filtered by scenario eligibility, scored against the
/// request, gated by the acceptance threshold, and ordered by
/// `(priority ascending, score descending, insertion index ascending)`.
pub fn match_request(
    snapshot: &[Arc<Mapping>],
    scenarios: &ScenarioEngine,
    settings: &ServerSettings,
    request: &RequestMessage,
) -> MatchOutcome {
    let mut scored: Vec<(usize, f64, &Arc<Mapping>)> = Vec::new();

    for (index, mapping) in snapshot.iter().enumerate() {
        if !scenario_eligible(mapping, scenarios) {
            continue;
        }
        let total = mapping.tree.score(request);
        trace!(id = %mapping.id, total, "scored mapping");
        if total > 0.0 {
            scored.push((index, total, mapping));
        }
    }

    let mut partials: Vec<PartialCandidate> = scored
        .iter()
        .map(|(_, score, m)| PartialCandidate {
            mapping_id: m.id,
            score: *score,
        })
        .collect();
    partials.sort_by(|a, b| b.score.total_cmp(&a.score));
    partials.truncate(PARTIAL_CANDIDATE_LIMIT);

    let threshold = settings.partial_match_threshold;
    let mut survivors: Vec<&(usize, f64, &Arc<Mapping>)> = scored
        .iter()
        .filter(|(_, score, _)| settings.allow_partial || *score >= threshold)
        .collect();

    // Stable sort over a vector already in insertion order: equal
    // (priority, score) pairs keep their insertion ranking.
    survivors.sort_by(|a, b| {
        a.2.priority
            .cmp(&b.2.priority)
            .then_with(|| b.1.total_cmp(&a.1))
    });

    MatchOutcome {
        winner: survivors.first().map(|(_, _, m)| Arc::clone(m)),
        partial_candidates: partials,
    }
}

/// A mapping with a scenario clause is eligible only while its scenario is
/// in the required state; `None` accepts any state.
pub fn scenario_eligible(mapping: &Mapping, scenarios: &ScenarioEngine) -> bool {
    match &mapping.scenario {
        None => true,
        Some(clause) => match &clause.required_state {
            None => true,
            Some(required) => scenarios.state_of(&clause.name) == *required,
        },
    }
}
