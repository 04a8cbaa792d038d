const ACTIVATE_BELOW: f64 = 0.80;
const RELEASE_AT: f64 = 0.90;
const SPENDING_MULTIPLIER: f64 = 0.90;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
enum State {
    #[default]
    Inactive,
    Active,
}

/// Hysteresis spending control keyed to the balance at retirement's start:
/// activates when the portfolio falls below 80% of that reference, releases
/// once it recovers to 90%, and trims planned spending by 10% while active.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct GuardrailPolicy {
    state: State,
    reference: Option<f64>,
}

impl GuardrailPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the retirement-start balance. Only the first call sticks.
    pub fn capture_reference(&mut self, balance: f64) {
        if self.reference.is_none() {
            self.reference = Some(balance);
        }
    }

    /// Advances the state machine against this year's balance and returns the
    /// spending multiplier to apply.
    pub fn observe(&mut self, balance: f64) -> f64 {
        let Some(reference) = self.reference else {
            return 1.0;
        };

        match self.state {
            State::Inactive if balance < ACTIVATE_BELOW * reference => {
                self.state = State::Active;
            }
            State::Active if balance >= RELEASE_AT * reference => {
                self.state = State::Inactive;
            }
            _ => {}
        }

        if self.state == State::Active {
            SPENDING_MULTIPLIER
        } else {
            1.0
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inert_until_the_reference_is_captured() {
        let mut policy = GuardrailPolicy::new();
        assert_eq!(policy.observe(1.0), 1.0);
        assert!(!policy.is_active());
    }

    #[test]
    fn activates_below_eighty_percent_of_reference() {
        let mut policy = GuardrailPolicy::new();
        policy.capture_reference(1_000_000.0);

        assert_eq!(policy.observe(850_000.0), 1.0);
        assert_eq!(policy.observe(799_999.0), SPENDING_MULTIPLIER);
        assert!(policy.is_active());
    }

    #[test]
    fn exact_eighty_percent_does_not_activate() {
        let mut policy = GuardrailPolicy::new();
        policy.capture_reference(1_000_000.0);
        assert_eq!(policy.observe(800_000.0), 1.0);
    }

    #[test]
    fn stays_active_inside_the_hysteresis_band() {
        let mut policy = GuardrailPolicy::new();
        policy.capture_reference(1_000_000.0);
        policy.observe(700_000.0);
        // Recovery to 85% is not enough to release.
        assert_eq!(policy.observe(850_000.0), SPENDING_MULTIPLIER);
        assert!(policy.is_active());
    }

    #[test]
    fn releases_at_ninety_percent_of_reference() {
        let mut policy = GuardrailPolicy::new();
        policy.capture_reference(1_000_000.0);
        policy.observe(700_000.0);
        assert_eq!(policy.observe(900_000.0), 1.0);
        assert!(!policy.is_active());
    }

    #[test]
    fn reference_is_captured_exactly_once() {
        let mut policy = GuardrailPolicy::new();
        policy.capture_reference(1_000_000.0);
        policy.capture_reference(100.0);
        // Still keyed to the first snapshot.
        assert_eq!(policy.observe(850_000.0), 1.0);
    }

    #[test]
    fn can_reactivate_after_a_release() {
        let mut policy = GuardrailPolicy::new();
        policy.capture_reference(1_000_000.0);
        policy.observe(700_000.0);
        policy.observe(950_000.0);
        assert!(!policy.is_active());
        assert_eq!(policy.observe(750_000.0), SPENDING_MULTIPLIER);
    }
}
