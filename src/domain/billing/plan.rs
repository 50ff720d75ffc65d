//! Subscription plans, billing cycles and the feature catalog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// Subscription plan.
///
/// Ordered by rank: every plan includes the features of the plans below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    /// Implicit plan of every tenant without a paid subscription.
    Free,
    Basic,
    Pro,
    Enterprise,
}

/// Named capability unlocked by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    BasicAnalytics,
    SingleUser,
    PrioritySupport,
    MultiUser,
    AdvancedAnalytics,
    ApiAccess,
    CustomFeatures,
}

impl Plan {
    /// All plans, cheapest first.
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Basic, Plan::Pro, Plan::Enterprise];

    /// Returns true if this plan is billed through the provider.
    pub fn is_paid(&self) -> bool {
        !matches!(self, Plan::Free)
    }

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Basic => "Basic",
            Plan::Pro => "Pro",
            Plan::Enterprise => "Enterprise",
        }
    }

    /// Monthly list price in cents.
    pub fn monthly_price_cents(&self) -> i64 {
        match self {
            Plan::Free => 0,
            Plan::Basic => 2_900,
            Plan::Pro => 9_900,
            Plan::Enterprise => 29_900,
        }
    }

    /// Features unlocked by this plan, including those inherited from lower plans.
    pub fn features(&self) -> Vec<Feature> {
        let mut features = vec![Feature::BasicAnalytics, Feature::SingleUser];
        if *self >= Plan::Basic {
            features.extend([Feature::PrioritySupport, Feature::MultiUser]);
        }
        if *self >= Plan::Pro {
            features.extend([Feature::AdvancedAnalytics, Feature::ApiAccess]);
        }
        if *self >= Plan::Enterprise {
            features.push(Feature::CustomFeatures);
        }
        features
    }

    /// Returns true if the plan unlocks `feature`.
    pub fn can_access(&self, feature: Feature) -> bool {
        self.features().contains(&feature)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Plan {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "basic" => Ok(Plan::Basic),
            "pro" => Ok(Plan::Pro),
            "enterprise" => Ok(Plan::Enterprise),
            other => Err(ValidationError::invalid_format(
                "plan",
                format!("unknown plan '{}'", other),
            )),
        }
    }
}

/// How often a paid plan renews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BillingCycle {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(BillingCycle::Monthly),
            "yearly" => Ok(BillingCycle::Yearly),
            other => Err(ValidationError::invalid_format(
                "billing_cycle",
                format!("unknown billing cycle '{}'", other),
            )),
        }
    }
}

/// Catalog entry shown to tenants choosing a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanOffering {
    pub plan: Plan,
    pub name: &'static str,
    pub monthly_price_cents: i64,
    pub features: Vec<Feature>,
}

/// Returns the full plan catalog, cheapest first.
pub fn plan_catalog() -> Vec<PlanOffering> {
    Plan::ALL
        .iter()
        .map(|plan| PlanOffering {
            plan: *plan,
            name: plan.display_name(),
            monthly_price_cents: plan.monthly_price_cents(),
            features: plan.features(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_is_the_only_unpaid_plan() {
        assert!(!Plan::Free.is_paid());
        assert!(Plan::Basic.is_paid());
        assert!(Plan::Pro.is_paid());
        assert!(Plan::Enterprise.is_paid());
    }

    #[test]
    fn higher_plans_inherit_lower_plan_features() {
        assert!(Plan::Free.can_access(Feature::BasicAnalytics));
        assert!(!Plan::Free.can_access(Feature::MultiUser));

        assert!(Plan::Basic.can_access(Feature::PrioritySupport));
        assert!(!Plan::Basic.can_access(Feature::ApiAccess));

        assert!(Plan::Pro.can_access(Feature::ApiAccess));
        assert!(Plan::Pro.can_access(Feature::SingleUser));
        assert!(!Plan::Pro.can_access(Feature::CustomFeatures));

        assert_eq!(Plan::Enterprise.features().len(), 7);
    }

    #[test]
    fn plan_parses_case_insensitively() {
        assert_eq!("Pro".parse::<Plan>().unwrap(), Plan::Pro);
        assert_eq!(" enterprise ".parse::<Plan>().unwrap(), Plan::Enterprise);
        assert!("gold".parse::<Plan>().is_err());
    }

    #[test]
    fn billing_cycle_parses_and_displays() {
        assert_eq!("yearly".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert_eq!(BillingCycle::Monthly.to_string(), "monthly");
        assert!("weekly".parse::<BillingCycle>().is_err());
    }

    #[test]
    fn plan_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Plan::Enterprise).unwrap(), "\"enterprise\"");
        let plan: Plan = serde_json::from_str("\"basic\"").unwrap();
        assert_eq!(plan, Plan::Basic);
    }

    #[test]
    fn catalog_lists_plans_cheapest_first() {
        let catalog = plan_catalog();
        let prices: Vec<i64> = catalog.iter().map(|o| o.monthly_price_cents).collect();
        assert_eq!(prices, vec![0, 2_900, 9_900, 29_900]);
        assert_eq!(catalog[2].name, "Pro");
    }
}
