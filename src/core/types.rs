use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("simulation failed: {0}")]
    Internal(String),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccountKind {
    #[serde(alias = "employerPretax", alias = "employer_pretax")]
    EmployerPretax,
    #[serde(alias = "employerRoth", alias = "employer_roth")]
    EmployerRoth,
    Ira,
    #[serde(alias = "rothIra", alias = "roth_ira")]
    RothIra,
    #[serde(alias = "healthSavings", alias = "health_savings")]
    HealthSavings,
    Taxable,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AssetAllocation {
    pub stocks: f64,
    pub bonds: f64,
    pub cash: f64,
}

impl Default for AssetAllocation {
    fn default() -> Self {
        Self {
            stocks: 0.6,
            bonds: 0.4,
            cash: 0.0,
        }
    }
}

impl AssetAllocation {
    /// Effective weights, re-normalized to sum to 1.
    pub fn normalized(&self) -> [f64; 3] {
        let total = self.stocks + self.bonds + self.cash;
        if total <= 0.0 {
            return [0.0, 0.0, 1.0];
        }
        [
            self.stocks / total,
            self.bonds / total,
            self.cash / total,
        ]
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateBounds {
    pub optimistic: f64,
    pub pessimistic: f64,
    pub sentiment: Option<f64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateAssumptions {
    pub stocks: Option<RateBounds>,
    pub bonds: Option<RateBounds>,
    pub inflation: Option<RateBounds>,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpouseBenefit {
    pub monthly_benefit: f64,
    pub claiming_age: u32,
    pub full_retirement_age: u32,
}

impl Default for SpouseBenefit {
    fn default() -> Self {
        Self {
            monthly_benefit: 0.0,
            claiming_age: 67,
            full_retirement_age: 67,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BenefitParams {
    pub monthly_benefit: f64,
    pub claiming_age: u32,
    pub full_retirement_age: u32,
    pub married: bool,
    pub spouse: Option<SpouseBenefit>,
}

impl Default for BenefitParams {
    fn default() -> Self {
        Self {
            monthly_benefit: 0.0,
            claiming_age: 67,
            full_retirement_age: 67,
            married: false,
            spouse: None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PremiumParams {
    pub enabled: bool,
    pub pension_income: f64,
    pub investment_income: f64,
    pub tax_deferred_balance: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HouseholdParams {
    pub life_expectancy: u32,
    pub spouse_life_expectancy: Option<u32>,
    pub legacy_goal: f64,
}

impl Default for HouseholdParams {
    fn default() -> Self {
        Self {
            life_expectancy: DEFAULT_LIFE_EXPECTANCY,
            spouse_life_expectancy: None,
            legacy_goal: 0.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduledContribution {
    pub account: AccountKind,
    pub annual_amount: f64,
    pub income_linked: bool,
    pub start_age: u32,
    pub end_age: u32,
}

impl Default for ScheduledContribution {
    fn default() -> Self {
        Self {
            account: AccountKind::Taxable,
            annual_amount: 0.0,
            income_linked: false,
            start_age: 0,
            end_age: u32::MAX,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutoSave {
    pub enabled: bool,
    pub annual_amount: f64,
}

#[derive(Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SavingsPlan {
    pub schedules: Vec<ScheduledContribution>,
    pub auto_save: Option<AutoSave>,
}

#[derive(Copy, Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelocationParams {
    pub age: u32,
    pub sale_price: Option<f64>,
    pub new_home_price: f64,
    pub new_mortgage_balance: f64,
    pub new_annual_rate: f64,
    pub new_term_years: u32,
}

impl Default for RelocationParams {
    fn default() -> Self {
        Self {
            age: 0,
            sale_price: None,
            new_home_price: 0.0,
            new_mortgage_balance: 0.0,
            new_annual_rate: 0.0,
            new_term_years: 30,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MortgageParams {
    pub balance: f64,
    pub annual_rate: f64,
    pub monthly_payment: f64,
    pub home_value: f64,
    pub relocation: Option<RelocationParams>,
}

pub const DEFAULT_LIFE_EXPECTANCY: u32 = 90;
pub const DEFAULT_SPOUSE_LIFE_EXPECTANCY: u32 = 92;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationParams {
    pub current_age: u32,
    pub retirement_age: u32,
    pub starting_savings: f64,
    pub annual_contribution: f64,
    pub monthly_spending: f64,
    pub allocation: AssetAllocation,
    pub assumptions: Option<RateAssumptions>,
    pub benefits: Option<BenefitParams>,
    pub premiums: Option<PremiumParams>,
    pub household: Option<HouseholdParams>,
    pub savings_plan: Option<SavingsPlan>,
    pub mortgage: Option<MortgageParams>,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            current_age: 45,
            retirement_age: 65,
            starting_savings: 300_000.0,
            annual_contribution: 20_000.0,
            monthly_spending: 5_000.0,
            allocation: AssetAllocation::default(),
            assumptions: None,
            benefits: None,
            premiums: None,
            household: None,
            savings_plan: None,
            mortgage: None,
        }
    }
}

impl SimulationParams {
    pub fn legacy_goal(&self) -> f64 {
        self.household.map(|h| h.legacy_goal).unwrap_or(0.0)
    }

    pub fn is_married(&self) -> bool {
        self.benefits.map(|b| b.married).unwrap_or(false)
            || self
                .household
                .map(|h| h.spouse_life_expectancy.is_some())
                .unwrap_or(false)
    }

    pub fn life_expectancy(&self) -> u32 {
        self.household
            .map(|h| h.life_expectancy)
            .unwrap_or(DEFAULT_LIFE_EXPECTANCY)
    }

    pub fn spouse_life_expectancy(&self) -> Option<u32> {
        if !self.is_married() {
            return None;
        }
        Some(
            self.household
                .and_then(|h| h.spouse_life_expectancy)
                .unwrap_or(DEFAULT_SPOUSE_LIFE_EXPECTANCY),
        )
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |msg: String| Err(EngineError::InvalidParams(msg));

        if self.retirement_age <= self.current_age {
            return fail(format!(
                "retirementAge ({}) must be > currentAge ({})",
                self.retirement_age, self.current_age
            ));
        }

        for (name, value) in [
            ("startingSavings", self.starting_savings),
            ("annualContribution", self.annual_contribution),
        ] {
            if !value.is_finite() || value < 0.0 {
                return fail(format!("{name} must be finite and >= 0"));
            }
        }

        if !self.monthly_spending.is_finite() || self.monthly_spending <= 0.0 {
            return fail("monthlySpending must be finite and > 0".to_string());
        }

        let a = &self.allocation;
        for (name, weight) in [("stocks", a.stocks), ("bonds", a.bonds), ("cash", a.cash)] {
            if !weight.is_finite() || weight < 0.0 {
                return fail(format!("allocation.{name} must be finite and >= 0"));
            }
        }
        if a.stocks + a.bonds + a.cash <= 0.0 {
            return fail("allocation weights must sum to a positive value".to_string());
        }

        if let Some(assumptions) = &self.assumptions {
            for (name, bounds) in [
                ("stocks", assumptions.stocks),
                ("bonds", assumptions.bonds),
                ("inflation", assumptions.inflation),
            ] {
                let Some(bounds) = bounds else { continue };
                if !bounds.optimistic.is_finite() || !bounds.pessimistic.is_finite() {
                    return fail(format!("assumptions.{name} bounds must be finite"));
                }
                if let Some(sentiment) = bounds.sentiment {
                    if !sentiment.is_finite() {
                        return fail(format!("assumptions.{name}.sentiment must be finite"));
                    }
                }
            }
        }

        if let Some(benefits) = &self.benefits {
            if !benefits.monthly_benefit.is_finite() || benefits.monthly_benefit < 0.0 {
                return fail("benefits.monthlyBenefit must be finite and >= 0".to_string());
            }
            if benefits.full_retirement_age == 0 || benefits.claiming_age == 0 {
                return fail(
                    "benefits.claimingAge and benefits.fullRetirementAge must be > 0".to_string(),
                );
            }
            if let Some(spouse) = &benefits.spouse {
                if !spouse.monthly_benefit.is_finite() || spouse.monthly_benefit < 0.0 {
                    return fail(
                        "benefits.spouse.monthlyBenefit must be finite and >= 0".to_string(),
                    );
                }
                if spouse.full_retirement_age == 0 || spouse.claiming_age == 0 {
                    return fail(
                        "benefits.spouse claiming and full-retirement ages must be > 0".to_string(),
                    );
                }
            }
        }

        if let Some(premiums) = &self.premiums {
            for (name, value) in [
                ("pensionIncome", premiums.pension_income),
                ("investmentIncome", premiums.investment_income),
                ("taxDeferredBalance", premiums.tax_deferred_balance),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return fail(format!("premiums.{name} must be finite and >= 0"));
                }
            }
        }

        if let Some(household) = &self.household {
            if household.life_expectancy <= self.retirement_age {
                return fail(format!(
                    "household.lifeExpectancy ({}) must be > retirementAge ({})",
                    household.life_expectancy, self.retirement_age
                ));
            }
            if let Some(spouse_le) = household.spouse_life_expectancy {
                if spouse_le <= self.current_age {
                    return fail("household.spouseLifeExpectancy must be > currentAge".to_string());
                }
            }
            if !household.legacy_goal.is_finite() || household.legacy_goal < 0.0 {
                return fail("household.legacyGoal must be finite and >= 0".to_string());
            }
        }

        if let Some(plan) = &self.savings_plan {
            for (idx, schedule) in plan.schedules.iter().enumerate() {
                if !schedule.annual_amount.is_finite() || schedule.annual_amount < 0.0 {
                    return fail(format!(
                        "savingsPlan.schedules[{idx}].annualAmount must be finite and >= 0"
                    ));
                }
                if schedule.start_age > schedule.end_age {
                    return fail(format!(
                        "savingsPlan.schedules[{idx}] startAge must be <= endAge"
                    ));
                }
            }
            if let Some(auto_save) = &plan.auto_save {
                if !auto_save.annual_amount.is_finite() || auto_save.annual_amount < 0.0 {
                    return fail(
                        "savingsPlan.autoSave.annualAmount must be finite and >= 0".to_string(),
                    );
                }
            }
        }

        if let Some(mortgage) = &self.mortgage {
            for (name, value) in [
                ("balance", mortgage.balance),
                ("annualRate", mortgage.annual_rate),
                ("monthlyPayment", mortgage.monthly_payment),
                ("homeValue", mortgage.home_value),
            ] {
                if !value.is_finite() || value < 0.0 {
                    return fail(format!("mortgage.{name} must be finite and >= 0"));
                }
            }
            if let Some(relocation) = &mortgage.relocation {
                if relocation.age <= self.current_age {
                    return fail("mortgage.relocation.age must be > currentAge".to_string());
                }
                for (name, value) in [
                    ("newHomePrice", relocation.new_home_price),
                    ("newMortgageBalance", relocation.new_mortgage_balance),
                    ("newAnnualRate", relocation.new_annual_rate),
                ] {
                    if !value.is_finite() || value < 0.0 {
                        return fail(format!("mortgage.relocation.{name} must be finite and >= 0"));
                    }
                }
                if relocation.new_term_years == 0 {
                    return fail("mortgage.relocation.newTermYears must be > 0".to_string());
                }
                if let Some(sale_price) = relocation.sale_price {
                    if !sale_price.is_finite() || sale_price < 0.0 {
                        return fail(
                            "mortgage.relocation.salePrice must be finite and >= 0".to_string(),
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBands {
    pub p5: Vec<f64>,
    pub p25: Vec<f64>,
    pub p50: Vec<f64>,
    pub p75: Vec<f64>,
    pub p95: Vec<f64>,
}

#[derive(Copy, Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailYear {
    pub year_of_retirement: u32,
    pub activations: u32,
    pub fraction: f64,
}

#[derive(Copy, Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InflationSummary {
    pub low: f64,
    pub median: f64,
    pub high: f64,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub percentiles: PercentileBands,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
    pub median_ending_balance: f64,
    pub guardrail_activations: u64,
    pub guardrail_by_year: Vec<GuardrailYear>,
    pub inflation: InflationSummary,
    pub benefit_income_by_year: Option<Vec<f64>>,
    pub premium_cost_by_year: Option<Vec<f64>>,
    pub surcharge_years: Option<Vec<u32>>,
}
