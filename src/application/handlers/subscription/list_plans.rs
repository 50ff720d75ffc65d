//! ListPlansHandler - Query handler for the plan catalog.

use crate::domain::billing::{plan_catalog, PlanOffering};

/// Handler returning every plan with its price and features.
#[derive(Debug, Default, Clone, Copy)]
pub struct ListPlansHandler;

impl ListPlansHandler {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self) -> Vec<PlanOffering> {
        plan_catalog()
    }
}
