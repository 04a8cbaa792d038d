//! Pure financial rules shared by every trial: benefit claiming, survivor
//! resolution, means-tested premium surcharges, minimum withdrawals,
//! contribution ceilings, and mortgage arithmetic. Nothing in this module
//! holds state between calls; all tables are immutable process-wide data.

use super::types::{AccountKind, MortgageParams, RelocationParams};

// ---------------------------------------------------------------------------
// Benefit claiming
// ---------------------------------------------------------------------------

/// Multiplier on the full-retirement-age benefit for a given claiming age.
/// Delayed claiming earns 8% per year of credit; early claiming is reduced at
/// 5/9 of 1% per month for the first 36 months and 5/12 of 1% per month past
/// that.
pub(crate) fn claiming_adjustment(claiming_age: u32, full_retirement_age: u32) -> f64 {
    let months = (claiming_age as i64 - full_retirement_age as i64) * 12;
    if months >= 0 {
        1.0 + (months as f64 / 12.0) * 0.08
    } else {
        let early = (-months) as f64;
        let first = early.min(36.0);
        let beyond = (early - 36.0).max(0.0);
        1.0 - (first * (5.0 / 9.0) / 100.0 + beyond * (5.0 / 12.0) / 100.0)
    }
}

/// Household benefit income for one year. While both members are alive the
/// benefits sum; after one death the survivor keeps the greater of the two.
/// `cola_factor` is the compounded cost-of-living factor since the start of
/// the simulation and applies to both.
pub(crate) fn survivor_benefit(
    primary_annual: f64,
    spouse_annual: f64,
    primary_alive: bool,
    spouse_alive: bool,
    cola_factor: f64,
) -> f64 {
    match (primary_alive, spouse_alive) {
        (true, true) => (primary_annual + spouse_annual) * cola_factor,
        (true, false) | (false, true) => primary_annual.max(spouse_annual) * cola_factor,
        (false, false) => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Means-tested premium
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug)]
struct PremiumBracket {
    /// Single-filer upper income threshold; joint filers double it.
    threshold: f64,
    monthly_surcharge: f64,
}

pub(crate) const PREMIUM_BASE_MONTHLY: f64 = 174.70;
pub(crate) const MEDICAL_INFLATION: f64 = 0.045;

static PREMIUM_BRACKETS: [PremiumBracket; 6] = [
    PremiumBracket {
        threshold: 103_000.0,
        monthly_surcharge: 0.0,
    },
    PremiumBracket {
        threshold: 129_000.0,
        monthly_surcharge: 69.90,
    },
    PremiumBracket {
        threshold: 161_000.0,
        monthly_surcharge: 174.70,
    },
    PremiumBracket {
        threshold: 193_000.0,
        monthly_surcharge: 279.50,
    },
    PremiumBracket {
        threshold: 500_000.0,
        monthly_surcharge: 384.30,
    },
    PremiumBracket {
        threshold: f64::INFINITY,
        monthly_surcharge: 419.30,
    },
];

/// The income figure the premium brackets are tested against.
pub(crate) fn modified_income(
    benefit_income: f64,
    pension_income: f64,
    minimum_withdrawal: f64,
    investment_income: f64,
) -> f64 {
    0.85 * benefit_income + pension_income + minimum_withdrawal + investment_income
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct PremiumQuote {
    pub annual_cost: f64,
    pub surcharged: bool,
}

/// Annualized premium for the applicable bracket, compounded by medical
/// inflation for `years_since_reference` years past the bracket table's
/// reference year.
pub(crate) fn premium_quote(
    income: f64,
    joint_filing: bool,
    years_since_reference: u32,
) -> PremiumQuote {
    let scale = if joint_filing { 2.0 } else { 1.0 };
    let bracket = PREMIUM_BRACKETS
        .iter()
        .find(|b| income <= b.threshold * scale)
        .unwrap_or(&PREMIUM_BRACKETS[PREMIUM_BRACKETS.len() - 1]);

    let monthly = PREMIUM_BASE_MONTHLY + bracket.monthly_surcharge;
    let growth = (1.0 + MEDICAL_INFLATION).powi(years_since_reference as i32);
    PremiumQuote {
        annual_cost: monthly * 12.0 * growth,
        surcharged: bracket.monthly_surcharge > 0.0,
    }
}

// ---------------------------------------------------------------------------
// Minimum withdrawal
// ---------------------------------------------------------------------------

const MINIMUM_WITHDRAWAL_START_AGE: u32 = 73;
const DIVISOR_TABLE_BASE_AGE: u32 = 72;

// Uniform lifetime divisors, ages 72 through 95. Older ages reuse the last
// entry.
static WITHDRAWAL_DIVISORS: [f64; 24] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, 18.5, 17.7, 16.8, 16.0, 15.2,
    14.4, 13.7, 12.9, 12.2, 11.5, 10.8, 10.1, 9.5, 8.9,
];

/// Mandatory annual distribution from a tax-deferred balance. Zero below the
/// start age.
pub(crate) fn minimum_withdrawal(age: u32, tax_deferred_balance: f64) -> f64 {
    if age < MINIMUM_WITHDRAWAL_START_AGE {
        return 0.0;
    }
    let index = ((age - DIVISOR_TABLE_BASE_AGE) as usize).min(WITHDRAWAL_DIVISORS.len() - 1);
    tax_deferred_balance.max(0.0) / WITHDRAWAL_DIVISORS[index]
}

// ---------------------------------------------------------------------------
// Contribution ceilings
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum LimitClass {
    Employer,
    Ira,
    HealthSavings,
    Unlimited,
}

impl From<AccountKind> for LimitClass {
    fn from(kind: AccountKind) -> Self {
        match kind {
            AccountKind::EmployerPretax | AccountKind::EmployerRoth => LimitClass::Employer,
            AccountKind::Ira | AccountKind::RothIra => LimitClass::Ira,
            AccountKind::HealthSavings => LimitClass::HealthSavings,
            AccountKind::Taxable => LimitClass::Unlimited,
        }
    }
}

const EMPLOYER_BASE_LIMIT: f64 = 23_500.0;
const EMPLOYER_CATCH_UP: f64 = 7_500.0;
const EMPLOYER_SUPER_CATCH_UP: f64 = 11_250.0;
const IRA_BASE_LIMIT: f64 = 7_000.0;
const IRA_CATCH_UP: f64 = 1_000.0;
const HSA_BASE_LIMIT: f64 = 4_300.0;
const HSA_CATCH_UP: f64 = 1_000.0;
const CATCH_UP_AGE: u32 = 50;
const HSA_CATCH_UP_AGE: u32 = 55;
const SUPER_CATCH_UP_AGES: std::ops::RangeInclusive<u32> = 60..=63;

/// Annual ceiling for one limit class at one age. The employer-plan super
/// catch-up replaces the ordinary catch-up inside its age band.
pub(crate) fn contribution_limit(class: LimitClass, age: u32) -> f64 {
    match class {
        LimitClass::Employer => {
            if SUPER_CATCH_UP_AGES.contains(&age) {
                EMPLOYER_BASE_LIMIT + EMPLOYER_SUPER_CATCH_UP
            } else if age >= CATCH_UP_AGE {
                EMPLOYER_BASE_LIMIT + EMPLOYER_CATCH_UP
            } else {
                EMPLOYER_BASE_LIMIT
            }
        }
        LimitClass::Ira => {
            if age >= CATCH_UP_AGE {
                IRA_BASE_LIMIT + IRA_CATCH_UP
            } else {
                IRA_BASE_LIMIT
            }
        }
        LimitClass::HealthSavings => {
            if age >= HSA_CATCH_UP_AGE {
                HSA_BASE_LIMIT + HSA_CATCH_UP
            } else {
                HSA_BASE_LIMIT
            }
        }
        LimitClass::Unlimited => f64::INFINITY,
    }
}

/// Remaining ceiling room per limit class within one simulated year.
#[derive(Debug, Default)]
pub(crate) struct ContributionHeadroom {
    used: [f64; 3],
}

impl ContributionHeadroom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants as much of `requested` as the class ceiling still allows this
    /// year and records the grant against the headroom.
    pub fn cap(&mut self, account: AccountKind, age: u32, requested: f64) -> f64 {
        let requested = requested.max(0.0);
        let class = LimitClass::from(account);
        let slot = match class {
            LimitClass::Employer => 0,
            LimitClass::Ira => 1,
            LimitClass::HealthSavings => 2,
            LimitClass::Unlimited => return requested,
        };
        let remaining = (contribution_limit(class, age) - self.used[slot]).max(0.0);
        let granted = requested.min(remaining);
        self.used[slot] += granted;
        granted
    }
}

// ---------------------------------------------------------------------------
// Mortgage
// ---------------------------------------------------------------------------

pub(crate) const HOME_APPRECIATION: f64 = 0.03;

#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct MortgageState {
    pub balance: f64,
    pub annual_rate: f64,
    pub monthly_payment: f64,
    pub home_value: f64,
}

impl MortgageState {
    pub fn from_params(params: &MortgageParams) -> Self {
        Self {
            balance: params.balance,
            annual_rate: params.annual_rate,
            monthly_payment: params.monthly_payment,
            home_value: params.home_value,
        }
    }
}

/// One simulated year of amortization: twelve monthly compounding steps, then
/// annual home appreciation. The balance never goes negative and never grows.
pub(crate) fn amortize_year(state: &mut MortgageState) {
    let monthly_rate = state.annual_rate / 12.0;
    for _ in 0..12 {
        if state.balance <= 0.0 {
            state.balance = 0.0;
            break;
        }
        let interest = state.balance * monthly_rate;
        let principal = (state.monthly_payment - interest)
            .max(0.0)
            .min(state.balance);
        state.balance -= principal;
    }
    state.home_value *= 1.0 + HOME_APPRECIATION;
}

/// Standard amortization payment `P·r / (1 − (1+r)^−n)`; a zero rate falls
/// back to straight-line repayment instead of dividing by zero.
pub(crate) fn amortization_payment(principal: f64, annual_rate: f64, term_years: u32) -> f64 {
    if principal <= 0.0 || term_years == 0 {
        return 0.0;
    }
    let n = (term_years * 12) as f64;
    let r = annual_rate / 12.0;
    if r == 0.0 {
        return principal / n;
    }
    principal * r / (1.0 - (1.0 + r).powf(-n))
}

/// Executes the one-time relocation: sell at the configured (or current
/// appraised) price net of the remaining balance, buy the new home with its
/// new mortgage, and return the net cash freed for the portfolio.
pub(crate) fn relocate(state: &mut MortgageState, relocation: &RelocationParams) -> f64 {
    let sale_price = relocation.sale_price.unwrap_or(state.home_value);
    let sale_net = sale_price - state.balance;
    let down_payment = relocation.new_home_price - relocation.new_mortgage_balance;

    state.balance = relocation.new_mortgage_balance;
    state.annual_rate = relocation.new_annual_rate;
    state.home_value = relocation.new_home_price;
    state.monthly_payment = amortization_payment(
        relocation.new_mortgage_balance,
        relocation.new_annual_rate,
        relocation.new_term_years,
    );

    sale_net - down_payment
}
