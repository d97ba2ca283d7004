use triage_core::config::RouterConfig;
use triage_core::domain::conversation::{Role, Turn};

/// Per-turn cost estimate: `prefix + suffix + per_item * item_count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenEstimator {
    pub prefix: usize,
    pub suffix: usize,
    pub per_item: usize,
}

impl TokenEstimator {
    pub fn cost(&self, turn: &Turn) -> usize {
        self.prefix + self.suffix + self.per_item * turn.content.item_count()
    }

    pub fn total(&self, turns: &[Turn]) -> usize {
        turns.iter().map(|turn| self.cost(turn)).sum()
    }
}

/// Token-budget policy applied before each decision-step model call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistoryTrimmer {
    estimator: TokenEstimator,
    budget: usize,
}

impl HistoryTrimmer {
    pub fn new(estimator: TokenEstimator, budget: usize) -> Self {
        Self { estimator, budget }
    }

    pub fn from_config(config: &RouterConfig) -> Self {
        Self::new(
            TokenEstimator {
                prefix: config.turn_prefix_tokens,
                suffix: config.turn_suffix_tokens,
                per_item: config.per_item_tokens,
            },
            config.trim_budget_tokens,
        )
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Keeps the leading system turn plus the longest suffix that fits the
    /// budget and starts at a user turn or right after the system turn. When
    /// nothing fits, keeps the system turn and the most recent turn.
    pub fn trim(&self, history: &[Turn]) -> Vec<Turn> {
        let Some(last) = history.last() else {
            return Vec::new();
        };

        let leading_system = history.first().filter(|turn| turn.role == Role::System);
        let body_start = usize::from(leading_system.is_some());
        let fixed_cost = leading_system.map(|turn| self.estimator.cost(turn)).unwrap_or(0);

        // suffix_costs[i] = cost of history[i..]
        let mut suffix_costs = vec![0usize; history.len() + 1];
        for index in (0..history.len()).rev() {
            suffix_costs[index] = suffix_costs[index + 1] + self.estimator.cost(&history[index]);
        }

        let start = (body_start..history.len()).find(|&index| {
            let boundary = index == body_start || history[index].role == Role::User;
            boundary && fixed_cost + suffix_costs[index] <= self.budget
        });

        let mut trimmed = Vec::new();
        if let Some(system) = leading_system {
            trimmed.push(system.clone());
        }
        match start {
            Some(index) => trimmed.extend_from_slice(&history[index..]),
            None if history.len() > body_start => trimmed.push(last.clone()),
            None => {}
        }
        trimmed
    }
}
