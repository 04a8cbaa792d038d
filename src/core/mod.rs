mod engine;
mod guardrail;
mod market;
mod random;
mod rules;
mod types;

pub use engine::{DEFAULT_ITERATIONS, run_simulation};
pub use random::{RandomSource, XorShiftSource};
pub use types::{
    AccountKind, AssetAllocation, AutoSave, BenefitParams, EngineError, GuardrailYear,
    HouseholdParams, InflationSummary, MortgageParams, PercentileBands, PremiumParams,
    RateAssumptions, RateBounds, RelocationParams, SavingsPlan, ScheduledContribution,
    SimulationParams, SimulationResult, SpouseBenefit,
};
