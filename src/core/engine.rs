use std::time::Instant;

use log::info;
use rayon::prelude::*;

use super::guardrail::GuardrailPolicy;
use super::market::{FACTOR_COUNT, MarketModel};
use super::random::{RandomSource, XorShiftSource, derive_stream, stratified_normal_matrix};
use super::rules::{
    ContributionHeadroom, MortgageState, amortize_year, claiming_adjustment, minimum_withdrawal,
    modified_income, premium_quote, relocate, survivor_benefit,
};
use super::types::{
    EngineError, GuardrailYear, InflationSummary, PercentileBands, SimulationParams,
    SimulationResult,
};

pub const DEFAULT_ITERATIONS: u32 = 5_000;

const DEATH_JITTER_YEARS: f64 = 5.0;
const PREMIUM_ELIGIBLE_AGE: u32 = 65;

/// Runs the full Monte Carlo projection. All randomness flows through
/// `source`: sample matrices are pre-generated from it and each trial's
/// private stream is derived from a master seed drawn from it, so a seeded
/// source makes the whole run bit-reproducible even though trials execute in
/// parallel.
pub fn run_simulation(
    params: &SimulationParams,
    iterations: u32,
    source: &mut dyn RandomSource,
) -> Result<SimulationResult, EngineError> {
    if iterations == 0 {
        return Err(EngineError::InvalidParams(
            "iterations must be > 0".to_string(),
        ));
    }
    params.validate()?;

    let started = Instant::now();
    let years = horizon_years(params);
    let n = iterations as usize;

    if (params.retirement_age - params.current_age) as usize >= years {
        return Err(EngineError::InvalidParams(format!(
            "retirementAge ({}) falls outside the simulated horizon of {years} years",
            params.retirement_age
        )));
    }

    info!("running {n} trials over {years} simulated years");

    // Correlations hold within a year, not across years, so every year gets
    // its own stratified sample of all trials.
    let yearly_samples: Vec<Vec<Vec<f64>>> = (0..years)
        .map(|_| stratified_normal_matrix(n, FACTOR_COUNT, source))
        .collect();
    let master_seed = source.next_u64();

    let market = MarketModel::new(params.assumptions);

    let trials: Vec<TrialOutcome> = (0..n)
        .into_par_iter()
        .map(|trial| {
            let mut stream = derive_stream(master_seed, trial as u64);
            run_trial(params, years, trial, &yearly_samples, &market, &mut stream)
        })
        .collect();

    let result = aggregate(params, &trials, years);
    info!(
        "completed {n} trials in {:?}, success rate {:.1}%",
        started.elapsed(),
        result.success_rate
    );
    Ok(result)
}

fn horizon_years(params: &SimulationParams) -> usize {
    let last_age = params
        .life_expectancy()
        .max(params.spouse_life_expectancy().unwrap_or(0))
        + DEATH_JITTER_YEARS as u32;
    (last_age.saturating_sub(params.current_age)).max(1) as usize
}

/// Scratch state for one trial, reset for every trial and discarded at its
/// end.
struct TrialState {
    balance: f64,
    mortgage: Option<MortgageState>,
    guardrail: GuardrailPolicy,
    primary_death_year: f64,
    spouse_death_year: Option<f64>,
}

struct TrialOutcome {
    balances: Vec<f64>,
    success: bool,
    guardrail_years: Vec<bool>,
    first_year_inflation: f64,
    benefit_income: Vec<f64>,
    premium_cost: Vec<f64>,
    surcharged: Vec<bool>,
}

fn run_trial(
    params: &SimulationParams,
    years: usize,
    trial_index: usize,
    yearly_samples: &[Vec<Vec<f64>>],
    market: &MarketModel,
    stream: &mut XorShiftSource,
) -> TrialOutcome {
    let weights = params.allocation.normalized();

    let death_jitter =
        |stream: &mut XorShiftSource| (stream.next_f64() * 2.0 - 1.0) * DEATH_JITTER_YEARS;
    let primary_death_year = (params.life_expectancy() as f64 - params.current_age as f64)
        + death_jitter(stream);
    let spouse_death_year = params
        .spouse_life_expectancy()
        .map(|le| (le as f64 - params.current_age as f64) + death_jitter(stream));

    let mut state = TrialState {
        balance: params.starting_savings,
        mortgage: params.mortgage.as_ref().map(MortgageState::from_params),
        guardrail: GuardrailPolicy::new(),
        primary_death_year,
        spouse_death_year,
    };

    let mut outcome = TrialOutcome {
        balances: Vec::with_capacity(years),
        success: false,
        guardrail_years: Vec::with_capacity(years),
        first_year_inflation: 0.0,
        benefit_income: Vec::with_capacity(years),
        premium_cost: Vec::with_capacity(years),
        surcharged: Vec::with_capacity(years),
    };

    let mut cumulative_inflation = 1.0;

    for year in 0..years {
        let age = params.current_age + year as u32;
        let retired = age >= params.retirement_age;

        if age == params.retirement_age {
            state.guardrail.capture_reference(state.balance);
        }

        let rates = market.rates_for(&yearly_samples[year][trial_index], stream);
        if year == 0 {
            outcome.first_year_inflation = rates.inflation;
        }
        cumulative_inflation *= 1.0 + rates.inflation;

        let portfolio_return =
            weights[0] * rates.stocks + weights[1] * rates.bonds + weights[2] * rates.cash;

        let benefit_income = if retired {
            household_benefit(params, &state, year, cumulative_inflation)
        } else {
            0.0
        };

        let mut premium_cost = 0.0;
        let mut surcharged = false;
        if age >= PREMIUM_ELIGIBLE_AGE {
            if let Some(premiums) = params.premiums.filter(|p| p.enabled) {
                let income = modified_income(
                    benefit_income,
                    premiums.pension_income,
                    minimum_withdrawal(age, premiums.tax_deferred_balance),
                    premiums.investment_income,
                );
                let quote = premium_quote(income, params.is_married(), year as u32);
                premium_cost = quote.annual_cost;
                surcharged = quote.surcharged;
            }
        }

        if let Some(mortgage) = state.mortgage.as_mut() {
            amortize_year(mortgage);
            if let Some(relocation) = params
                .mortgage
                .as_ref()
                .and_then(|m| m.relocation)
                .filter(|r| r.age == age)
            {
                state.balance += relocate(mortgage, &relocation);
            }
        }

        let mut guardrail_active = false;
        if !retired {
            let mut headroom = ContributionHeadroom::new();
            let mut contributions = params.annual_contribution;
            if let Some(plan) = &params.savings_plan {
                for schedule in &plan.schedules {
                    if age < schedule.start_age || age > schedule.end_age {
                        continue;
                    }
                    let requested = if schedule.income_linked {
                        schedule.annual_amount * cumulative_inflation
                    } else {
                        schedule.annual_amount
                    };
                    contributions += headroom.cap(schedule.account, age, requested);
                }
            }

            state.balance += contributions;
            state.balance *= 1.0 + portfolio_return;
            if let Some(auto_save) = params
                .savings_plan
                .as_ref()
                .and_then(|p| p.auto_save)
                .filter(|a| a.enabled)
            {
                state.balance += auto_save.annual_amount;
            }
        } else {
            let spending = params.monthly_spending * 12.0 * cumulative_inflation;
            // The guardrail trims planned spending only; fixed income and
            // premium components pass through untouched.
            let multiplier = state.guardrail.observe(state.balance);
            guardrail_active = state.guardrail.is_active();
            let withdrawal = spending * multiplier + premium_cost - benefit_income;

            state.balance *= 1.0 + portfolio_return;
            state.balance -= withdrawal;
        }

        if state.balance < 0.0 {
            state.balance = 0.0;
        }

        outcome.balances.push(state.balance);
        outcome.guardrail_years.push(guardrail_active);
        outcome.benefit_income.push(benefit_income);
        outcome.premium_cost.push(premium_cost);
        outcome.surcharged.push(surcharged);
    }

    let final_balance = outcome.balances.last().copied().unwrap_or(0.0);
    let legacy_goal = params.legacy_goal();
    // With the balance floored at zero, a zero legacy goal would make every
    // trial "succeed"; depletion still counts as failure.
    outcome.success = if legacy_goal > 0.0 {
        final_balance >= legacy_goal
    } else {
        final_balance > 0.0
    };
    outcome
}

fn household_benefit(
    params: &SimulationParams,
    state: &TrialState,
    year: usize,
    cola_factor: f64,
) -> f64 {
    let Some(benefits) = params.benefits else {
        return 0.0;
    };
    let age = params.current_age + year as u32;

    let primary_annual = if age >= benefits.claiming_age {
        benefits.monthly_benefit
            * 12.0
            * claiming_adjustment(benefits.claiming_age, benefits.full_retirement_age)
    } else {
        0.0
    };
    let spouse_annual = benefits
        .spouse
        .filter(|_| benefits.married)
        .map(|spouse| {
            if age >= spouse.claiming_age {
                spouse.monthly_benefit
                    * 12.0
                    * claiming_adjustment(spouse.claiming_age, spouse.full_retirement_age)
            } else {
                0.0
            }
        })
        .unwrap_or(0.0);

    let primary_alive = (year as f64) < state.primary_death_year;
    let spouse_alive = state
        .spouse_death_year
        .map(|death| (year as f64) < death)
        .unwrap_or(false);

    if state.spouse_death_year.is_some() {
        survivor_benefit(
            primary_annual,
            spouse_annual,
            primary_alive,
            spouse_alive,
            cola_factor,
        )
    } else if primary_alive {
        primary_annual * cola_factor
    } else {
        0.0
    }
}

fn percentile_index(n: usize, p: f64) -> usize {
    ((n as f64 * p).floor() as usize).min(n.saturating_sub(1))
}

fn binomial_ci_half_width(p: f64, n: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn aggregate(params: &SimulationParams, trials: &[TrialOutcome], years: usize) -> SimulationResult {
    let n = trials.len();

    let mut bands = PercentileBands {
        p5: Vec::with_capacity(years),
        p25: Vec::with_capacity(years),
        p50: Vec::with_capacity(years),
        p75: Vec::with_capacity(years),
        p95: Vec::with_capacity(years),
    };
    let mut year_balances = vec![0.0_f64; n];
    for year in 0..years {
        for (slot, trial) in year_balances.iter_mut().zip(trials) {
            *slot = trial.balances[year];
        }
        year_balances.sort_by(|a, b| a.total_cmp(b));
        bands.p5.push(year_balances[percentile_index(n, 0.05)]);
        bands.p25.push(year_balances[percentile_index(n, 0.25)]);
        bands.p50.push(year_balances[percentile_index(n, 0.50)]);
        bands.p75.push(year_balances[percentile_index(n, 0.75)]);
        bands.p95.push(year_balances[percentile_index(n, 0.95)]);
    }
    let median_ending_balance = bands.p50.last().copied().unwrap_or(0.0);

    let successes = trials.iter().filter(|t| t.success).count();
    let success_fraction = successes as f64 / n as f64;

    let retirement_index = (params.retirement_age - params.current_age) as usize;
    let retired_years = years.saturating_sub(retirement_index);
    let mut guardrail_by_year = Vec::with_capacity(retired_years);
    let mut guardrail_activations = 0_u64;
    for offset in 0..retired_years {
        let year = retirement_index + offset;
        let activations = trials
            .iter()
            .filter(|t| t.guardrail_years[year])
            .count() as u32;
        guardrail_activations += activations as u64;
        guardrail_by_year.push(GuardrailYear {
            year_of_retirement: offset as u32,
            activations,
            fraction: activations as f64 / n as f64,
        });
    }

    let mut first_year_draws: Vec<f64> = trials.iter().map(|t| t.first_year_inflation).collect();
    first_year_draws.sort_by(|a, b| a.total_cmp(b));
    let inflation = InflationSummary {
        low: first_year_draws.first().copied().unwrap_or(0.0),
        median: first_year_draws[percentile_index(n, 0.50)],
        high: first_year_draws.last().copied().unwrap_or(0.0),
    };

    let average_by_year = |select: fn(&TrialOutcome) -> &Vec<f64>| -> Vec<f64> {
        (0..years)
            .map(|year| trials.iter().map(|t| select(t)[year]).sum::<f64>() / n as f64)
            .collect()
    };

    let benefit_income_by_year = params
        .benefits
        .is_some()
        .then(|| average_by_year(|t| &t.benefit_income));

    let premiums_enabled = params.premiums.map(|p| p.enabled).unwrap_or(false);
    let premium_cost_by_year = premiums_enabled.then(|| average_by_year(|t| &t.premium_cost));
    let surcharge_years = premiums_enabled.then(|| {
        (0..years)
            .filter(|&year| {
                let count = trials.iter().filter(|t| t.surcharged[year]).count();
                count * 2 >= n
            })
            .map(|year| year as u32)
            .collect()
    });

    SimulationResult {
        percentiles: bands,
        success_rate: success_fraction * 100.0,
        success_ci_half_width: binomial_ci_half_width(success_fraction, n) * 100.0,
        median_ending_balance,
        guardrail_activations,
        guardrail_by_year,
        inflation,
        benefit_income_by_year,
        premium_cost_by_year,
        surcharge_years,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        AssetAllocation, AutoSave, BenefitParams, HouseholdParams, MortgageParams, PremiumParams,
        RelocationParams, SavingsPlan, SimulationParams,
    };
    use proptest::prelude::{prop_assert, proptest};

    fn run_seeded(params: &SimulationParams, iterations: u32, seed: u64) -> SimulationResult {
        let mut source = XorShiftSource::seeded(seed);
        run_simulation(params, iterations, &mut source).expect("run must succeed")
    }

    fn assert_result_invariants(result: &SimulationResult) {
        assert!((0.0..=100.0).contains(&result.success_rate));
        assert!(result.success_ci_half_width >= 0.0);

        let years = result.percentiles.p50.len();
        assert_eq!(result.percentiles.p5.len(), years);
        assert_eq!(result.percentiles.p95.len(), years);
        for year in 0..years {
            let p5 = result.percentiles.p5[year];
            let p25 = result.percentiles.p25[year];
            let p50 = result.percentiles.p50[year];
            let p75 = result.percentiles.p75[year];
            let p95 = result.percentiles.p95[year];
            for v in [p5, p25, p50, p75, p95] {
                assert!(v.is_finite() && v >= 0.0);
            }
            assert!(p5 <= p25 && p25 <= p50 && p50 <= p75 && p75 <= p95);
        }

        for year in &result.guardrail_by_year {
            assert!((0.0..=1.0).contains(&year.fraction));
        }
    }

    #[test]
    fn rejects_zero_iterations() {
        let params = SimulationParams::default();
        let mut source = XorShiftSource::seeded(1);
        let err = run_simulation(&params, 0, &mut source).expect_err("must reject");
        assert!(err.to_string().contains("iterations"));
    }

    #[test]
    fn rejects_malformed_params() {
        let mut params = SimulationParams::default();
        params.retirement_age = params.current_age;
        let mut source = XorShiftSource::seeded(1);
        assert!(run_simulation(&params, 100, &mut source).is_err());
    }

    #[test]
    fn seeded_runs_are_bit_identical() {
        let params = SimulationParams::default();
        let a = run_seeded(&params, 300, 42);
        let b = run_seeded(&params, 300, 42);
        let json_a = serde_json::to_string(&a).expect("serialize");
        let json_b = serde_json::to_string(&b).expect("serialize");
        assert_eq!(json_a, json_b);
    }

    #[test]
    fn different_seeds_differ() {
        let params = SimulationParams::default();
        let a = run_seeded(&params, 300, 42);
        let b = run_seeded(&params, 300, 43);
        assert_ne!(a.median_ending_balance, b.median_ending_balance);
    }

    #[test]
    fn baseline_scenario_lands_in_the_expected_band() {
        // Age 45, retire at 65, 300k saved, 20k/yr contributions, 5k/mo
        // spending, 60/40 allocation: the canonical mid-career household.
        let params = SimulationParams::default();
        let result = run_seeded(&params, 5_000, 7);
        assert_result_invariants(&result);

        assert!(
            result.success_rate >= 55.0 && result.success_rate <= 98.0,
            "success rate {}",
            result.success_rate
        );

        // Two decades of accumulation must move the median up.
        let retirement_year = (params.retirement_age - params.current_age) as usize;
        assert!(result.percentiles.p50[retirement_year] > result.percentiles.p50[0]);
    }

    #[test]
    fn unreachable_legacy_goal_fails_every_trial() {
        let mut params = SimulationParams::default();
        params.household = Some(HouseholdParams {
            legacy_goal: 1.0e15,
            ..HouseholdParams::default()
        });
        let result = run_seeded(&params, 500, 11);
        assert_eq!(result.success_rate, 0.0);
    }

    #[test]
    fn all_cash_allocation_narrows_the_outcome_spread() {
        let mut cash_params = SimulationParams::default();
        cash_params.allocation = AssetAllocation {
            stocks: 0.0,
            bonds: 0.0,
            cash: 1.0,
        };
        let mut equity_params = SimulationParams::default();
        equity_params.allocation = AssetAllocation {
            stocks: 1.0,
            bonds: 0.0,
            cash: 0.0,
        };

        let cash = run_seeded(&cash_params, 1_000, 13);
        let equity = run_seeded(&equity_params, 1_000, 13);

        let year = 15;
        let cash_spread = cash.percentiles.p95[year] - cash.percentiles.p5[year];
        let equity_spread = equity.percentiles.p95[year] - equity.percentiles.p5[year];
        assert!(
            cash_spread < equity_spread * 0.5,
            "cash spread {cash_spread} vs equity spread {equity_spread}"
        );
    }

    #[test]
    fn guardrail_reporting_starts_at_retirement() {
        let params = SimulationParams::default();
        let result = run_seeded(&params, 400, 17);

        let years = result.percentiles.p50.len();
        let retired_years = years - (params.retirement_age - params.current_age) as usize;
        assert_eq!(result.guardrail_by_year.len(), retired_years);
        assert_eq!(result.guardrail_by_year[0].year_of_retirement, 0);

        let total: u64 = result
            .guardrail_by_year
            .iter()
            .map(|y| y.activations as u64)
            .sum();
        assert_eq!(total, result.guardrail_activations);
    }

    #[test]
    fn diagnostics_are_absent_without_their_modules() {
        let result = run_seeded(&SimulationParams::default(), 200, 19);
        assert!(result.benefit_income_by_year.is_none());
        assert!(result.premium_cost_by_year.is_none());
        assert!(result.surcharge_years.is_none());
    }

    #[test]
    fn benefit_income_appears_after_the_claiming_age() {
        let mut params = SimulationParams::default();
        params.benefits = Some(BenefitParams {
            monthly_benefit: 2_500.0,
            claiming_age: 67,
            full_retirement_age: 67,
            married: false,
            spouse: None,
        });
        let result = run_seeded(&params, 300, 23);

        let incomes = result.benefit_income_by_year.expect("diagnostic present");
        let claim_index = (67 - params.current_age) as usize;
        assert!(incomes[..claim_index].iter().all(|v| *v == 0.0));
        // Benefits at the claiming year exceed the nominal annual amount
        // because of cost-of-living compounding.
        assert!(incomes[claim_index] >= 2_500.0 * 12.0 * 0.9);
    }

    #[test]
    fn premium_costs_kick_in_at_sixty_five() {
        let mut params = SimulationParams::default();
        params.premiums = Some(PremiumParams {
            enabled: true,
            pension_income: 0.0,
            investment_income: 0.0,
            tax_deferred_balance: 0.0,
        });
        let result = run_seeded(&params, 300, 29);

        let costs = result.premium_cost_by_year.expect("diagnostic present");
        let eligible_index = (PREMIUM_ELIGIBLE_AGE - params.current_age) as usize;
        assert!(costs[..eligible_index].iter().all(|v| *v == 0.0));
        assert!(costs[eligible_index] > 0.0);
        assert!(result.surcharge_years.expect("list present").is_empty());
    }

    #[test]
    fn high_outside_income_triggers_the_surcharge_every_eligible_year() {
        let mut params = SimulationParams::default();
        params.premiums = Some(PremiumParams {
            enabled: true,
            pension_income: 400_000.0,
            investment_income: 200_000.0,
            tax_deferred_balance: 0.0,
        });
        let result = run_seeded(&params, 300, 31);

        let years = result.percentiles.p50.len();
        let eligible_index = (PREMIUM_ELIGIBLE_AGE - params.current_age) as usize;
        let surcharge_years = result.surcharge_years.expect("list present");
        assert_eq!(
            surcharge_years,
            ((eligible_index as u32)..(years as u32)).collect::<Vec<_>>()
        );
    }

    #[test]
    fn relocation_cash_shows_up_in_the_median_trajectory() {
        let mortgage = MortgageParams {
            balance: 100_000.0,
            annual_rate: 0.04,
            monthly_payment: 1_000.0,
            home_value: 600_000.0,
            relocation: None,
        };
        let mut stay_put = SimulationParams::default();
        stay_put.mortgage = Some(mortgage);

        let mut downsizer = SimulationParams::default();
        downsizer.mortgage = Some(MortgageParams {
            relocation: Some(RelocationParams {
                age: 66,
                sale_price: None,
                new_home_price: 200_000.0,
                new_mortgage_balance: 0.0,
                new_annual_rate: 0.0,
                new_term_years: 30,
            }),
            ..mortgage
        });

        let baseline = run_seeded(&stay_put, 800, 37);
        let downsized = run_seeded(&downsizer, 800, 37);

        let year = (66 - stay_put.current_age) as usize;
        assert!(downsized.percentiles.p50[year] > baseline.percentiles.p50[year]);
    }

    #[test]
    fn scheduled_contributions_and_auto_save_grow_the_accumulation_phase() {
        use crate::core::types::{AccountKind, ScheduledContribution};

        let mut boosted = SimulationParams::default();
        boosted.savings_plan = Some(SavingsPlan {
            schedules: vec![ScheduledContribution {
                account: AccountKind::EmployerPretax,
                annual_amount: 10_000.0,
                income_linked: false,
                start_age: 45,
                end_age: 64,
            }],
            auto_save: Some(AutoSave {
                enabled: true,
                annual_amount: 2_000.0,
            }),
        });

        let base = run_seeded(&SimulationParams::default(), 500, 41);
        let extra = run_seeded(&boosted, 500, 41);

        let retirement_year = (65 - 45) as usize;
        assert!(extra.percentiles.p50[retirement_year] > base.percentiles.p50[retirement_year]);
    }

    #[test]
    fn inflation_summary_orders_low_median_high() {
        let result = run_seeded(&SimulationParams::default(), 500, 43);
        assert!(result.inflation.low <= result.inflation.median);
        assert!(result.inflation.median <= result.inflation.high);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]

        #[test]
        fn prop_results_hold_their_invariants(
            seed in proptest::prelude::any::<u64>(),
            current_age in 30u32..60,
            retirement_offset in 1u32..20,
            savings in 0u32..2_000_000,
            contribution in 0u32..60_000,
            spending in 1_000u32..15_000,
            stocks in 0u32..100,
            bonds in 0u32..100,
            cash in 1u32..100,
            iterations in 20u32..120
        ) {
            let mut params = SimulationParams::default();
            params.current_age = current_age;
            params.retirement_age = current_age + retirement_offset;
            params.starting_savings = savings as f64;
            params.annual_contribution = contribution as f64;
            params.monthly_spending = spending as f64;
            params.allocation = AssetAllocation {
                stocks: stocks as f64,
                bonds: bonds as f64,
                cash: cash as f64,
            };
            params.household = Some(HouseholdParams {
                life_expectancy: params.retirement_age + 10,
                spouse_life_expectancy: None,
                legacy_goal: 0.0,
            });

            let mut source = XorShiftSource::seeded(seed);
            let result = run_simulation(&params, iterations, &mut source)
                .expect("valid params must run");
            assert_result_invariants(&result);

            let expected_years =
                (params.retirement_age + 10 + 5 - params.current_age) as usize;
            prop_assert!(result.percentiles.p50.len() == expected_years);
        }
    }
}
