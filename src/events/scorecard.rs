//! Scorecard aggregation.
//!
//! Fed exclusively by the event pump (single writer); readers take cheap
//! snapshots for the control plane and the shutdown summary. Includes the
//! race-condition heuristic: per agent role, a commit-like endpoint firing
//! before an earlier prepare-like request has seen its response is flagged
//! as a candidate, counted, and never blocked.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::events::{Event, EventPhase};

/// Endpoint-name prefixes treated as the "prepare" half of a pair.
const PREPARE_PREFIXES: &[&str] = &["search_", "query_", "prepare_"];

/// Endpoint-name prefixes treated as the "commit" half of a pair.
const COMMIT_PREFIXES: &[&str] = &["book_", "commit_", "finalize_"];

/// Point-in-time scorecard counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScorecardSnapshot {
    /// Flows observed (request-phase events).
    pub total_requests: u64,
    /// Flows with at least one applied strategy.
    pub chaos_injections: u64,
    /// Swarm attack counts keyed by refined tag.
    pub swarm_communication_errors: BTreeMap<String, u64>,
    /// Flows where any swarm disruption applied.
    pub agent_to_agent_disruptions: u64,
    /// Consensus-vote delays applied.
    pub consensus_delays: u64,
    /// Inter-agent message mutations applied.
    pub message_mutations: u64,
    /// Agents cut off by isolation.
    pub agent_isolations: u64,
    /// Hallucination injections / total requests.
    pub hallucination_rate: f64,
    /// PII substitutions observed in redacted output.
    pub pii_leakage_incidents: u64,
    /// Protocol-level attacks (schema-aware fuzzing).
    pub protocol_attacks: u64,
    /// Commit-before-prepare orderings flagged by the heuristic.
    pub race_condition_candidates: u64,
    /// Strategy error counts keyed by error code.
    pub chaos_error_codes_total: BTreeMap<String, u64>,
    /// Events shed by the bounded bus.
    pub events_dropped: u64,
}

/// Per-role pending prepare-like requests: `(seq, endpoint)`.
#[derive(Debug, Default)]
struct RaceState {
    pending: Vec<(u64, String)>,
}

#[derive(Debug, Default)]
struct ScorecardState {
    snapshot: ScorecardSnapshot,
    hallucinations: u64,
    races: HashMap<String, RaceState>,
}

/// Scorecard aggregator.
#[derive(Debug, Default)]
pub struct Scorecard {
    state: Mutex<ScorecardState>,
}

impl Scorecard {
    /// Creates an empty scorecard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one event into the counters.
    pub fn observe(&self, event: &Event) {
        let mut state = self.state.lock().expect("scorecard lock poisoned");

        match event.phase {
            EventPhase::Request => {
                state.snapshot.total_requests += 1;
                self.observe_race_request(&mut state, event);
            }
            EventPhase::Response => {
                self.observe_race_response(&mut state, event);
            }
            EventPhase::Chaos => {
                state.snapshot.chaos_injections += 1;
            }
            EventPhase::Error => {
                if let Some(code) = &event.error_code {
                    *state
                        .snapshot
                        .chaos_error_codes_total
                        .entry(code.clone())
                        .or_default() += 1;
                }
            }
        }

        for tag in &event.attack_tags {
            match tag.as_str() {
                "hallucination" => state.hallucinations += 1,
                "mcp_fuzzing" => state.snapshot.protocol_attacks += 1,
                "swarm_disruption" => state.snapshot.agent_to_agent_disruptions += 1,
                refined if refined.starts_with("swarm:") => {
                    *state
                        .snapshot
                        .swarm_communication_errors
                        .entry(refined.to_string())
                        .or_default() += 1;
                    match refined {
                        "swarm:consensus_delay" => state.snapshot.consensus_delays += 1,
                        "swarm:message_mutation" => state.snapshot.message_mutations += 1,
                        "swarm:agent_isolation" => state.snapshot.agent_isolations += 1,
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        state.snapshot.pii_leakage_incidents += event.pii_hits;

        if state.snapshot.total_requests > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                state.snapshot.hallucination_rate =
                    state.hallucinations as f64 / state.snapshot.total_requests as f64;
            }
        }
    }

    fn observe_race_request(&self, state: &mut ScorecardState, event: &Event) {
        let Some(role) = event.agent_role.as_deref() else {
            return;
        };
        let Some(endpoint) = endpoint_name(&event.url_redacted) else {
            return;
        };

        if has_prefix(&endpoint, COMMIT_PREFIXES) {
            let race = state.races.entry(role.to_string()).or_default();
            if race.pending.iter().any(|(seq, _)| *seq < event.seq) {
                state.snapshot.race_condition_candidates += 1;
            }
        } else if has_prefix(&endpoint, PREPARE_PREFIXES) {
            state
                .races
                .entry(role.to_string())
                .or_default()
                .pending
                .push((event.seq, endpoint));
        }
    }

    fn observe_race_response(&self, state: &mut ScorecardState, event: &Event) {
        let Some(role) = event.agent_role.as_deref() else {
            return;
        };
        let Some(endpoint) = endpoint_name(&event.url_redacted) else {
            return;
        };
        if let Some(race) = state.races.get_mut(role) {
            // Oldest pending request for this endpoint got its response.
            if let Some(pos) = race.pending.iter().position(|(_, pending)| *pending == endpoint)
            {
                race.pending.remove(pos);
            }
        }
    }

    /// Records the bus's final drop count at shutdown.
    pub fn set_events_dropped(&self, dropped: u64) {
        self.state
            .lock()
            .expect("scorecard lock poisoned")
            .snapshot
            .events_dropped = dropped;
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> ScorecardSnapshot {
        self.state
            .lock()
            .expect("scorecard lock poisoned")
            .snapshot
            .clone()
    }

    /// Logs the shutdown summary.
    pub fn emit_summary(&self) {
        let snapshot = self.snapshot();
        info!(
            total_requests = snapshot.total_requests,
            chaos_injections = snapshot.chaos_injections,
            agent_to_agent_disruptions = snapshot.agent_to_agent_disruptions,
            hallucination_rate = snapshot.hallucination_rate,
            pii_leakage_incidents = snapshot.pii_leakage_incidents,
            race_condition_candidates = snapshot.race_condition_candidates,
            events_dropped = snapshot.events_dropped,
            "scorecard summary"
        );
    }
}

/// Last path segment of a URL, without query or fragment.
fn endpoint_name(url: &str) -> Option<String> {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    let path = trimmed.splitn(4, '/').nth(3).unwrap_or("");
    path.rsplit('/').next().map(str::to_string).filter(|s| !s.is_empty())
}

fn has_prefix(endpoint: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|p| endpoint.starts_with(p))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testutil::event;

    fn role_event(seq: u64, phase: EventPhase, role: &str, url: &str) -> Event {
        let mut e = event(seq, phase);
        e.agent_role = Some(role.to_string());
        e.url_redacted = url.to_string();
        e
    }

    #[test]
    fn counts_requests_and_chaos() {
        let sc = Scorecard::new();
        sc.observe(&event(0, EventPhase::Request));
        sc.observe(&event(0, EventPhase::Chaos));
        sc.observe(&event(0, EventPhase::Response));
        let snap = sc.snapshot();
        assert_eq!(snap.total_requests, 1);
        assert_eq!(snap.chaos_injections, 1);
    }

    #[test]
    fn swarm_tags_update_breakdown() {
        let sc = Scorecard::new();
        let mut e = event(0, EventPhase::Chaos);
        e.attack_tags = vec![
            "swarm_disruption".to_string(),
            "swarm:agent_isolation".to_string(),
        ];
        sc.observe(&e);
        let snap = sc.snapshot();
        assert_eq!(snap.agent_to_agent_disruptions, 1);
        assert_eq!(snap.agent_isolations, 1);
        assert_eq!(
            snap.swarm_communication_errors.get("swarm:agent_isolation"),
            Some(&1)
        );
    }

    #[test]
    fn hallucination_rate_over_requests() {
        let sc = Scorecard::new();
        for seq in 0..4 {
            sc.observe(&event(seq, EventPhase::Request));
        }
        let mut e = event(0, EventPhase::Chaos);
        e.attack_tags = vec!["hallucination".to_string()];
        sc.observe(&e);
        let snap = sc.snapshot();
        assert!((snap.hallucination_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn error_codes_counted() {
        let sc = Scorecard::new();
        let mut e = event(0, EventPhase::Error);
        e.error_code = Some("E_MUTATION_FAILED".to_string());
        sc.observe(&e);
        sc.observe(&e);
        let snap = sc.snapshot();
        assert_eq!(
            snap.chaos_error_codes_total.get("E_MUTATION_FAILED"),
            Some(&2)
        );
    }

    #[test]
    fn race_flagged_when_commit_beats_search_response() {
        let sc = Scorecard::new();
        // search_flights request, no response yet.
        sc.observe(&role_event(
            0,
            EventPhase::Request,
            "booker",
            "http://api/search_flights",
        ));
        // book_ticket fires before the search response.
        sc.observe(&role_event(
            1,
            EventPhase::Request,
            "booker",
            "http://api/book_ticket",
        ));
        assert_eq!(sc.snapshot().race_condition_candidates, 1);
    }

    #[test]
    fn no_race_after_response_arrives() {
        let sc = Scorecard::new();
        sc.observe(&role_event(
            0,
            EventPhase::Request,
            "booker",
            "http://api/search_flights",
        ));
        sc.observe(&role_event(
            0,
            EventPhase::Response,
            "booker",
            "http://api/search_flights",
        ));
        sc.observe(&role_event(
            1,
            EventPhase::Request,
            "booker",
            "http://api/book_ticket",
        ));
        assert_eq!(sc.snapshot().race_condition_candidates, 0);
    }

    #[test]
    fn races_scoped_per_role() {
        let sc = Scorecard::new();
        sc.observe(&role_event(
            0,
            EventPhase::Request,
            "searcher",
            "http://api/search_flights",
        ));
        // Different role commits; the searcher's pending request is not hers.
        sc.observe(&role_event(
            1,
            EventPhase::Request,
            "booker",
            "http://api/book_ticket",
        ));
        assert_eq!(sc.snapshot().race_condition_candidates, 0);
    }

    #[test]
    fn endpoint_extraction() {
        assert_eq!(
            endpoint_name("http://api.example/v1/search_flights?d=1"),
            Some("search_flights".to_string())
        );
        assert_eq!(
            endpoint_name("http://api.example/book_ticket"),
            Some("book_ticket".to_string())
        );
        assert_eq!(endpoint_name("http://api.example/"), None);
    }

    #[test]
    fn pii_hits_accumulate() {
        let sc = Scorecard::new();
        let mut e = event(0, EventPhase::Request);
        e.pii_hits = 3;
        sc.observe(&e);
        assert_eq!(sc.snapshot().pii_leakage_incidents, 3);
    }
}
