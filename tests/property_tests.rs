//! Property-based tests for consensus-lab
//!
//! - Citation extraction invariants (determinism, no self-citation, only known targets)
//! - Cost arithmetic is exact
//! - Support always equals the number of agents currently nominating a publication
//! - Run with ProptestConfig::with_cases(100)

use proptest::prelude::*;
use rustc_hash::FxHashSet;

use consensus_lab::citation::extract_citations;
use consensus_lab::experiment::{
    AgentConfig, Cost, ExperimentRecord, NewAgent, NewPublication, SolutionReason,
};
use consensus_lab::lifecycle::PublicationLifecycle;
use consensus_lab::solution::SolutionTracker;
use consensus_lab::store::Store;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Four-character lower-case alphanumeric reference
fn arb_reference() -> impl Strategy<Value = String> {
    "[a-z0-9]{4}"
}

/// Text sprinkled with citation groups, some known, some not
fn arb_content(known: Vec<String>) -> impl Strategy<Value = String> {
    let known = if known.is_empty() { vec!["ab12".to_string()] } else { known };
    let token = prop_oneof![
        proptest::sample::select(known.clone()).prop_map(|r| format!("[{r}]")),
        proptest::collection::vec(proptest::sample::select(known), 1..4)
            .prop_map(|refs| format!("[{}]", refs.join(", "))),
        arb_reference().prop_map(|r| format!("[{}]", r.to_uppercase())),
        "[a-z ]{0,20}",
        Just("[]".to_string()),
        Just("array[0]".to_string()),
    ];
    proptest::collection::vec(token, 0..12).prop_map(|parts| parts.join(" "))
}

fn arb_case() -> impl Strategy<Value = (FxHashSet<String>, String, String)> {
    proptest::collection::hash_set(arb_reference(), 1..8).prop_flat_map(|refs| {
        let refs: Vec<String> = refs.into_iter().collect();
        let own = proptest::sample::select(refs.clone());
        (Just(refs.iter().cloned().collect::<FxHashSet<_>>()), arb_content(refs), own)
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: same inputs always produce the same extraction
    #[test]
    fn prop_extraction_is_deterministic((known, content, own) in arb_case()) {
        prop_assert_eq!(
            extract_citations(&content, &known, &own),
            extract_citations(&content, &known, &own)
        );
    }

    /// Property: a publication never cites itself
    #[test]
    fn prop_no_self_citation((known, content, own) in arb_case()) {
        let found = extract_citations(&content, &known, &own);
        prop_assert!(!found.references.contains(&own));
        prop_assert!(!found.unknown_targets.contains(&own));
    }

    /// Property: every extracted reference is known; unknown tokens are reported apart
    #[test]
    fn prop_only_known_references((known, content, own) in arb_case()) {
        let found = extract_citations(&content, &known, &own);
        prop_assert!(found.references.iter().all(|r| known.contains(r)));
        prop_assert!(found.unknown_targets.iter().all(|r| !known.contains(r)));
        prop_assert!(found.references.iter().chain(&found.unknown_targets).all(|r| r.len() == 4));
    }

    /// Property: re-extracting from the extracted references is a fixed point
    #[test]
    fn prop_extraction_is_idempotent((known, content, own) in arb_case()) {
        let found = extract_citations(&content, &known, &own);
        let rendered: Vec<String> = found.references.iter().map(|r| format!("[{r}]")).collect();
        let again = extract_citations(&rendered.join(" "), &known, &own);
        prop_assert_eq!(again.references, found.references);
    }

    /// Property: ledger sums are exact in integer nanodollars
    #[test]
    fn prop_cost_sum_is_exact(nanos in proptest::collection::vec(0i64..1_000_000_000, 0..50)) {
        let total: Cost = nanos.iter().copied().map(Cost::from_nanos).sum();
        prop_assert_eq!(total.nanos(), nanos.iter().sum::<i64>());
    }
}

// ============================================================================
// Store-backed properties
// ============================================================================

/// Sequence of (agent index, publication index or retraction)
fn arb_nominations() -> impl Strategy<Value = Vec<(usize, Option<usize>)>> {
    proptest::collection::vec((0usize..4, proptest::option::weighted(0.8, 0usize..3)), 1..30)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(25))]

    /// Property: support(p) == |{agents whose latest nomination is p}|
    #[test]
    fn prop_support_matches_latest_nominations(nominations in arb_nominations()) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let store = Store::open_in_memory().unwrap();
            let exp = store.create_experiment(ExperimentRecord::new("E", "p")).await.unwrap();
            let mut agents = Vec::new();
            for i in 0..4 {
                let agent = store
                    .create_agent(exp.id(), NewAgent::new(format!("a{i}"), AgentConfig::new("x", "m")))
                    .await
                    .unwrap();
                agents.push(agent.id());
            }
            let lifecycle = PublicationLifecycle::for_experiment(store.clone(), &exp).unwrap();
            lifecycle.advisory().register("a0").await.unwrap();
            let mut refs = Vec::new();
            for i in 0..3 {
                let submitted = lifecycle
                    .submit(agents[0], NewPublication::new(format!("P{i}"), "", "body"))
                    .await
                    .unwrap();
                lifecycle.publish(submitted.publication.reference()).await.unwrap();
                refs.push(submitted.publication.reference().to_string());
            }

            let tracker = SolutionTracker::new(store.clone(), exp.id());
            let mut latest: [Option<usize>; 4] = [None; 4];
            for (agent, target) in &nominations {
                tracker
                    .nominate(agents[*agent], target.map(|t| refs[t].as_str()), SolutionReason::NewApproach)
                    .await
                    .unwrap();
                latest[*agent] = *target;
            }

            for (i, reference) in refs.iter().enumerate() {
                let expected = latest.iter().filter(|t| **t == Some(i)).count();
                assert_eq!(tracker.support(reference).await.unwrap(), expected);
            }
        });
    }
}
