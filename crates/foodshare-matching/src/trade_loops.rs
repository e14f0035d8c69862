use foodshare_core::{Listing, TradeLink, TradeLoop};

use crate::config::TradeLoopBudget;
use crate::criteria::value_score;

/// An offer whose value has already been resolved.
#[derive(Debug, Clone, Copy)]
pub struct LoopCandidate<'a> {
    pub offer: &'a Listing,
    pub value: f64,
}

/// Depth-bounded DFS for chains of offers that route value back to the
/// requester.
///
/// Each hop must beat `value_threshold` on the value-match score against the
/// previous hop (the request for the first hop). A chain is recorded as a
/// loop whenever the owner of its last offer needs something the requester
/// can trade. Offers are used at most once per chain; backtracking frees them
/// for sibling branches.
pub struct TradeLoopFinder {
    budget: TradeLoopBudget,
}

struct SearchState<'c, 'a> {
    request: &'c Listing,
    candidates: &'c [LoopCandidate<'a>],
    visited: Vec<bool>,
    chain: Vec<TradeLink>,
    loops: Vec<TradeLoop>,
}

impl TradeLoopFinder {
    pub fn new(budget: TradeLoopBudget) -> Self {
        Self { budget }
    }

    pub fn find(
        &self,
        request: &Listing,
        request_value: f64,
        candidates: &[LoopCandidate<'_>],
    ) -> Vec<TradeLoop> {
        if self.budget.max_depth == 0 || self.budget.max_loops == 0 || request.trade_items.is_empty()
        {
            return Vec::new();
        }
        let pool = &candidates[..candidates.len().min(self.budget.max_pool)];
        let mut state = SearchState {
            request,
            candidates: pool,
            visited: vec![false; pool.len()],
            chain: Vec::with_capacity(self.budget.max_depth),
            loops: Vec::new(),
        };
        self.extend(&mut state, request_value);
        state.loops
    }

    fn extend(&self, state: &mut SearchState<'_, '_>, frontier_value: f64) {
        if state.chain.len() >= self.budget.max_depth {
            return;
        }
        for idx in 0..state.candidates.len() {
            if state.loops.len() >= self.budget.max_loops {
                return;
            }
            if state.visited[idx] {
                continue;
            }
            let candidate = state.candidates[idx];
            let score = value_score(frontier_value, candidate.value);
            if score <= self.budget.value_threshold {
                continue;
            }

            state.visited[idx] = true;
            state.chain.push(TradeLink {
                offer_id: candidate.offer.id.clone(),
                owner_id: candidate.offer.user_id().map(str::to_string),
                category: candidate.offer.category.clone(),
                value: candidate.value,
                value_score: score,
            });

            if closes_loop(state.request, candidate.offer) {
                state
                    .loops
                    .push(TradeLoop::new(state.request.id.clone(), state.chain.clone()));
            }
            self.extend(state, candidate.value);

            state.chain.pop();
            state.visited[idx] = false;
        }
    }
}

/// Whether the offer's owner needs something the requester can hand over.
pub fn closes_loop(request: &Listing, offer: &Listing) -> bool {
    let Some(owner) = &offer.user else {
        return false;
    };
    owner.needs.iter().any(|need| {
        request
            .trade_items
            .iter()
            .any(|item| item.trim().eq_ignore_ascii_case(need.trim()))
    })
}
