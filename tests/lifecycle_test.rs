//! Publication lifecycle integration tests
//!
//! Advisory fast path, review guards, policy-driven transitions and the
//! conditional-update race between concurrent transitions.

use std::sync::Arc;

use consensus_lab::experiment::{
    AgentConfig, ExperimentRecord, Grade, NewAgent, NewPublication, PublicationStatus,
};
use consensus_lab::lifecycle::{PublicationLifecycle, PublishPolicy, ThresholdPolicy, Verdict};
use consensus_lab::store::Store;
use consensus_lab::Error;

struct Lab {
    store: Store,
    experiment: ExperimentRecord,
    lifecycle: PublicationLifecycle,
    agents: Vec<i64>,
}

async fn lab(agent_count: usize, config: Option<serde_json::Value>) -> Lab {
    let store = Store::open_in_memory().unwrap();
    let mut builder = ExperimentRecord::builder("E", "find the bug");
    if let Some(config) = config {
        builder = builder.config(config);
    }
    let experiment = store.create_experiment(builder.build()).await.unwrap();
    let mut agents = Vec::new();
    for i in 1..=agent_count {
        let agent = store
            .create_agent(
                experiment.id(),
                NewAgent::new(format!("a{i}"), AgentConfig::new("anthropic", "claude")),
            )
            .await
            .unwrap();
        agents.push(agent.id());
    }
    let lifecycle = PublicationLifecycle::for_experiment(store.clone(), &experiment).unwrap();
    Lab {
        store,
        experiment,
        lifecycle,
        agents,
    }
}

fn paper(content: &str) -> NewPublication {
    NewPublication::new("Finding", "Short abstract", content)
}

// =============================================================================
// Advisory fast path
// =============================================================================

#[tokio::test]
async fn test_advisory_author_publishes_without_reviews() {
    let lab = lab(1, None).await;
    lab.lifecycle.advisory().register("a1").await.unwrap();

    let submitted = lab.lifecycle.submit(lab.agents[0], paper("exploit")).await.unwrap();
    assert_eq!(submitted.publication.status(), PublicationStatus::Submitted);

    let reference = submitted.publication.reference().to_string();
    let published = lab.lifecycle.publish(&reference).await.unwrap();

    assert_eq!(published.status(), PublicationStatus::Published);
    assert!(lab.lifecycle.reviews_for(&reference).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unregistered_author_needs_reviews() {
    let lab = lab(2, None).await;
    lab.lifecycle.advisory().register("a1").await.unwrap();
    lab.lifecycle.advisory().unregister("a1").await.unwrap();

    let submitted = lab.lifecycle.submit(lab.agents[0], paper("exploit")).await.unwrap();
    let result = lab.lifecycle.publish(submitted.publication.reference()).await;
    assert!(matches!(result, Err(Error::PolicyUnsatisfied { .. })));
}

#[tokio::test]
async fn test_advisory_is_per_experiment() {
    let lab = lab(1, None).await;
    let other = lab
        .store
        .create_experiment(ExperimentRecord::new("F", "other"))
        .await
        .unwrap();
    let other_agent = lab
        .store
        .create_agent(other.id(), NewAgent::new("a1", AgentConfig::new("x", "m")))
        .await
        .unwrap();
    lab.lifecycle.advisory().register("a1").await.unwrap();

    let other_lifecycle = PublicationLifecycle::for_experiment(lab.store.clone(), &other).unwrap();
    let submitted = other_lifecycle
        .submit(other_agent.id(), paper("x"))
        .await
        .unwrap();
    assert!(matches!(
        other_lifecycle.publish(submitted.publication.reference()).await,
        Err(Error::PolicyUnsatisfied { .. })
    ));
}

// =============================================================================
// Transitions
// =============================================================================

#[tokio::test]
async fn test_double_publish_is_rejected() {
    let lab = lab(3, None).await;
    let submitted = lab.lifecycle.submit(lab.agents[0], paper("x")).await.unwrap();
    let reference = submitted.publication.reference().to_string();
    lab.lifecycle.review(lab.agents[1], &reference, Grade::Accept, "ok").await.unwrap();
    lab.lifecycle.review(lab.agents[2], &reference, Grade::Accept, "ok").await.unwrap();

    let first = lab.lifecycle.publish(&reference).await.unwrap();
    let second = lab.lifecycle.publish(&reference).await;

    assert!(matches!(second, Err(Error::InvalidState { .. })));
    let current = lab.lifecycle.get(&reference).await.unwrap();
    assert_eq!(current.status(), first.status());
    assert_eq!(current.updated_at(), first.updated_at());
}

#[tokio::test]
async fn test_rejected_is_terminal() {
    let lab = lab(3, None).await;
    let submitted = lab.lifecycle.submit(lab.agents[0], paper("x")).await.unwrap();
    let reference = submitted.publication.reference().to_string();
    lab.lifecycle.review(lab.agents[1], &reference, Grade::Reject, "no").await.unwrap();
    lab.lifecycle.review(lab.agents[2], &reference, Grade::Reject, "no").await.unwrap();

    assert_eq!(lab.lifecycle.settle(&reference).await.unwrap(), PublicationStatus::Rejected);
    assert!(matches!(
        lab.lifecycle.publish(&reference).await,
        Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
        lab.lifecycle.reject(&reference).await,
        Err(Error::InvalidState { .. })
    ));
}

#[tokio::test]
async fn test_policy_from_experiment_config() {
    let config = serde_json::json!({"publish_policy": {"min_accepts": 1, "strong_reject_veto": false}});
    let lab = lab(2, Some(config)).await;
    let submitted = lab.lifecycle.submit(lab.agents[0], paper("x")).await.unwrap();
    let reference = submitted.publication.reference().to_string();

    lab.lifecycle.review(lab.agents[1], &reference, Grade::Accept, "ok").await.unwrap();
    assert_eq!(
        lab.lifecycle.publish(&reference).await.unwrap().status(),
        PublicationStatus::Published
    );
}

#[derive(Debug)]
struct UnanimousPolicy;

impl PublishPolicy for UnanimousPolicy {
    fn decide(&self, tally: &consensus_lab::experiment::ReviewTally) -> Verdict {
        match (tally.accepts(), tally.rejects()) {
            (_, r) if r > 0 => Verdict::Reject,
            (a, _) if a >= 3 => Verdict::Publish,
            _ => Verdict::Pending,
        }
    }
}

#[tokio::test]
async fn test_injected_policy() {
    let lab = lab(4, None).await;
    let lifecycle = PublicationLifecycle::new(lab.store.clone(), lab.experiment.id(), Arc::new(UnanimousPolicy));
    let submitted = lifecycle.submit(lab.agents[0], paper("x")).await.unwrap();
    let reference = submitted.publication.reference().to_string();

    lifecycle.review(lab.agents[1], &reference, Grade::StrongAccept, "ok").await.unwrap();
    lifecycle.review(lab.agents[2], &reference, Grade::StrongAccept, "ok").await.unwrap();
    assert_eq!(lifecycle.settle(&reference).await.unwrap(), PublicationStatus::Submitted);

    lifecycle.review(lab.agents[3], &reference, Grade::Accept, "ok").await.unwrap();
    assert_eq!(lifecycle.settle(&reference).await.unwrap(), PublicationStatus::Published);
}

#[test]
fn test_default_policy_is_threshold() {
    assert_eq!(
        ThresholdPolicy::from_experiment(&ExperimentRecord::new("e", "p")).unwrap(),
        ThresholdPolicy::default()
    );
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publish_has_one_winner() {
    for _ in 0..20 {
        let lab = lab(1, None).await;
        lab.lifecycle.advisory().register("a1").await.unwrap();
        let submitted = lab.lifecycle.submit(lab.agents[0], paper("x")).await.unwrap();
        let reference = submitted.publication.reference().to_string();

        let (first, second) = tokio::join!(
            {
                let lifecycle = lab.lifecycle.clone();
                let reference = reference.clone();
                tokio::spawn(async move { lifecycle.publish(&reference).await })
            },
            {
                let lifecycle = lab.lifecycle.clone();
                let reference = reference.clone();
                tokio::spawn(async move { lifecycle.publish(&reference).await })
            }
        );
        let results = [first.unwrap(), second.unwrap()];

        let wins = results.iter().filter(|r| r.is_ok()).count();
        let losses = results
            .iter()
            .filter(|r| matches!(r, Err(Error::InvalidState { .. })))
            .count();
        assert_eq!((wins, losses), (1, 1));
        assert_eq!(
            lab.lifecycle.get(&reference).await.unwrap().status(),
            PublicationStatus::Published
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_reviews() {
    let lab = lab(2, None).await;
    let submitted = lab.lifecycle.submit(lab.agents[0], paper("x")).await.unwrap();
    let reference = submitted.publication.reference().to_string();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let lifecycle = lab.lifecycle.clone();
        let reference = reference.clone();
        let reviewer = lab.agents[1];
        handles.push(tokio::spawn(async move {
            lifecycle.review(reviewer, &reference, Grade::Accept, "ok").await
        }));
    }
    let mut ok = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(Error::DuplicateReview { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(lab.lifecycle.reviews_for(&reference).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publish_reject_race() {
    let lab = lab(3, Some(serde_json::json!({"publish_policy": {"min_accepts": 1, "max_rejects": 0, "strong_reject_veto": false}}))).await;
    let submitted = lab.lifecycle.submit(lab.agents[0], paper("x")).await.unwrap();
    let reference = submitted.publication.reference().to_string();
    lab.lifecycle.advisory().register("a1").await.unwrap();
    lab.lifecycle.review(lab.agents[1], &reference, Grade::Reject, "no").await.unwrap();

    // Reject verdict from reviews, publish allowed by advisory: exactly one wins
    let publish = {
        let lifecycle = lab.lifecycle.clone();
        let reference = reference.clone();
        tokio::spawn(async move { lifecycle.publish(&reference).await })
    };
    let reject = {
        let lifecycle = lab.lifecycle.clone();
        let reference = reference.clone();
        tokio::spawn(async move { lifecycle.reject(&reference).await })
    };
    let (published, rejected) = (publish.await.unwrap(), reject.await.unwrap());

    assert!(published.is_ok() ^ rejected.is_ok());
    let final_status = lab.lifecycle.get(&reference).await.unwrap().status();
    if published.is_ok() {
        assert_eq!(final_status, PublicationStatus::Published);
        assert!(matches!(rejected, Err(Error::InvalidState { .. })));
    } else {
        assert_eq!(final_status, PublicationStatus::Rejected);
        assert!(matches!(published, Err(Error::InvalidState { .. })));
    }
}
