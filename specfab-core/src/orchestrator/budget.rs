//! Run budget and usage accounting

use serde::{Deserialize, Serialize};
use specfab_common::config::BudgetConfig;
use std::fmt;

/// Hard resource ceilings for one run (immutable once the run starts)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunBudget {
    pub max_rounds: u32,
    pub max_sources: u32,
    pub max_pages: u32,
    pub max_model_calls: u32,
    pub max_cost: f64,
    pub max_wall_clock_secs: u64,
}

impl Default for RunBudget {
    fn default() -> Self {
        Self::from(&BudgetConfig::default())
    }
}

impl From<&BudgetConfig> for RunBudget {
    fn from(config: &BudgetConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            max_sources: config.max_sources,
            max_pages: config.max_pages,
            max_model_calls: config.max_model_calls,
            max_cost: config.max_cost,
            max_wall_clock_secs: config.max_wall_clock_secs,
        }
    }
}

/// Which ceiling was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCeiling {
    Rounds,
    Sources,
    Pages,
    ModelCalls,
    Cost,
    WallClock,
}

impl fmt::Display for BudgetCeiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rounds => "rounds",
            Self::Sources => "sources",
            Self::Pages => "pages",
            Self::ModelCalls => "model_calls",
            Self::Cost => "cost",
            Self::WallClock => "wall_clock",
        };
        write!(f, "{}", name)
    }
}

/// Resources consumed so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetUsage {
    pub rounds: u32,
    pub sources: u32,
    pub pages: u32,
    pub model_calls: u32,
    pub cost: f64,
}

impl BudgetUsage {
    pub fn charge(&mut self, pages: u32, model_calls: u32, cost: f64) {
        self.pages = self.pages.saturating_add(pages);
        self.model_calls = self.model_calls.saturating_add(model_calls);
        self.cost += cost.max(0.0);
    }
}

impl RunBudget {
    /// First ceiling reached or passed, checked in declaration order
    pub fn reached(&self, usage: &BudgetUsage, elapsed_secs: u64) -> Option<BudgetCeiling> {
        if usage.rounds >= self.max_rounds {
            Some(BudgetCeiling::Rounds)
        } else if usage.sources >= self.max_sources {
            Some(BudgetCeiling::Sources)
        } else if usage.pages >= self.max_pages {
            Some(BudgetCeiling::Pages)
        } else if usage.model_calls >= self.max_model_calls {
            Some(BudgetCeiling::ModelCalls)
        } else if usage.cost >= self.max_cost {
            Some(BudgetCeiling::Cost)
        } else if elapsed_secs >= self.max_wall_clock_secs {
            Some(BudgetCeiling::WallClock)
        } else {
            None
        }
    }

    /// First ceiling strictly exceeded (a mid-round overrun)
    pub fn overrun(&self, usage: &BudgetUsage) -> Option<(BudgetCeiling, String)> {
        if usage.pages > self.max_pages {
            Some((BudgetCeiling::Pages, format!("pages {} > {}", usage.pages, self.max_pages)))
        } else if usage.model_calls > self.max_model_calls {
            Some((
                BudgetCeiling::ModelCalls,
                format!("model calls {} > {}", usage.model_calls, self.max_model_calls),
            ))
        } else if usage.cost > self.max_cost + 1e-9 {
            Some((BudgetCeiling::Cost, format!("cost {:.4} > {:.4}", usage.cost, self.max_cost)))
        } else {
            None
        }
    }

    /// Whether another round of the average size seen so far still fits
    pub fn can_afford_round(&self, usage: &BudgetUsage) -> bool {
        if usage.rounds >= self.max_rounds || usage.sources >= self.max_sources {
            return false;
        }
        let rounds = usage.rounds.max(1) as f64;
        let avg_pages = (usage.pages as f64 / rounds).ceil().max(1.0);
        let avg_calls = (usage.model_calls as f64 / rounds).ceil();
        let avg_cost = usage.cost / rounds;

        (self.max_pages - usage.pages.min(self.max_pages)) as f64 >= avg_pages
            && (self.max_model_calls - usage.model_calls.min(self.max_model_calls)) as f64 >= avg_calls
            && self.max_cost - usage.cost >= avg_cost
    }

    pub fn remaining_sources(&self, usage: &BudgetUsage) -> u32 {
        self.max_sources.saturating_sub(usage.sources)
    }
}
