//! Fixed-data implementations of the external collaborators

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::traits::*;
use crate::types::*;

/// Totals aggregator backed by a map; unknown companies report zero totals
#[derive(Debug, Clone, Default)]
pub struct StaticTotals {
    totals: Arc<RwLock<HashMap<(String, NaiveDate), Totals>>>,
    unavailable: Arc<RwLock<HashSet<String>>>,
}

impl StaticTotals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, company_id: &str, date: NaiveDate, totals: Totals) {
        if let Ok(mut map) = self.totals.write() {
            map.insert((company_id.to_string(), date), totals);
        }
    }

    /// Make lookups for `company_id` fail with `UpstreamUnavailable`
    pub fn set_unavailable(&self, company_id: &str, unavailable: bool) {
        if let Ok(mut set) = self.unavailable.write() {
            if unavailable {
                set.insert(company_id.to_string());
            } else {
                set.remove(company_id);
            }
        }
    }
}

#[async_trait]
impl TotalsAggregator for StaticTotals {
    async fn get_totals(&self, company_id: &str, date: NaiveDate) -> ReconciliationResult<Totals> {
        let down = self
            .unavailable
            .read()
            .map(|set| set.contains(company_id))
            .unwrap_or(true);
        if down {
            return Err(ReconciliationError::UpstreamUnavailable(format!(
                "totals aggregator unavailable for {}",
                company_id
            )));
        }

        let totals = self
            .totals
            .read()
            .map_err(|_| {
                ReconciliationError::UpstreamUnavailable("totals lock poisoned".to_string())
            })?
            .get(&(company_id.to_string(), date))
            .cloned()
            .unwrap_or_else(Totals::zero);
        Ok(totals)
    }
}

/// Company directory with a fixed list of active companies
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    companies: Vec<String>,
}

impl StaticDirectory {
    pub fn new<I, S>(companies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            companies: companies.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl CompanyDirectory for StaticDirectory {
    async fn active_companies(&self) -> ReconciliationResult<Vec<String>> {
        Ok(self.companies.clone())
    }
}
