use common::Stage;
use proptest::prelude::*;

fn any_stage() -> impl Strategy<Value = Stage> {
    prop_oneof![
        Just(Stage::Backtest),
        Just(Stage::Simulated),
        Just(Stage::Real),
        Just(Stage::Retired),
    ]
}

proptest! {
    /// The transition function admits exactly the forward-promotion edges
    /// plus demotion to RETIRED — nothing else, ever.
    #[test]
    fn only_legal_stage_edges_are_reachable(from in any_stage(), to in any_stage()) {
        let legal = matches!(
            (from, to),
            (Stage::Backtest, Stage::Simulated)
                | (Stage::Simulated, Stage::Real)
                | (Stage::Simulated, Stage::Retired)
                | (Stage::Real, Stage::Retired)
        );
        prop_assert_eq!(from.can_transition(to), legal);
    }

    /// RETIRED is terminal: no edge leaves it.
    #[test]
    fn retired_is_terminal(to in any_stage()) {
        prop_assert!(!Stage::Retired.can_transition(to));
    }
}
