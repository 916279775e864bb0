use parking_lot::Mutex;
use proptest::prelude::*;
use retail_core::constants::events::{
    TRANSACTION_ABORTED, TRANSACTION_COMMITTED, TRANSACTION_COMPENSATED,
};
use retail_core::coordinator::{CompensationAction, StepStatus, TransactionCoordinator};
use retail_core::error::{CoordinatorError, ExecutionError};
use retail_core::events::{EventBus, EventModule};
use retail_core::TransactionStatus;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::common::{step_plan_strategy, EventRecorder};

fn logging_compensation(log: &Arc<Mutex<Vec<usize>>>, index: usize, fails: bool) -> CompensationAction {
    let log = Arc::clone(log);
    CompensationAction::new(move || async move {
        log.lock().push(index);
        if fails {
            Err(anyhow::anyhow!("compensation {index} failed"))
        } else {
            Ok(())
        }
    })
}

#[tokio::test]
async fn test_commit_after_all_steps_complete() {
    let bus = EventBus::new();
    let recorder = EventRecorder::attach(&bus, &[TRANSACTION_COMMITTED]);
    let coordinator = TransactionCoordinator::new(bus.clone());

    let tx = coordinator.begin_transaction(Some(json!({"userId": "cashier-7"})));
    for operation in ["reserve-stock", "record-sale"] {
        coordinator
            .execute_in_transaction(
                &tx,
                operation,
                EventModule::Sales,
                || async { Ok::<_, std::io::Error>(()) },
                None,
            )
            .await
            .unwrap();
    }

    coordinator.commit_transaction(&tx).await.unwrap();
    bus.flush().await;

    let context = coordinator.get_transaction_status(&tx).unwrap();
    assert_eq!(context.status, TransactionStatus::Committed);
    assert_eq!(context.count_steps(StepStatus::Completed), 2);

    let committed = recorder.events();
    assert_eq!(committed.len(), 1);
    assert_eq!(committed[0].entity_id, tx);
    let metadata = committed[0].metadata.as_ref().unwrap();
    assert_eq!(metadata.correlation_id.as_deref(), Some(tx.as_str()));
    assert_eq!(metadata.user_id.as_deref(), Some("cashier-7"));
}

#[tokio::test]
async fn test_commit_is_rejected_with_pending_step() {
    let coordinator = TransactionCoordinator::new(EventBus::new());
    let tx = coordinator.begin_transaction(None);
    coordinator
        .add_step(&tx, "reserve-stock", EventModule::Inventory, json!({}), None)
        .unwrap();

    let err = coordinator.commit_transaction(&tx).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::UncommittableSteps { pending: 1, failed: 0, .. }
    ));
    assert_eq!(
        coordinator.get_transaction_status(&tx).unwrap().status,
        TransactionStatus::Active
    );
}

#[tokio::test]
async fn test_step_failure_compensates_and_blocks_commit() {
    let bus = EventBus::new();
    let recorder = EventRecorder::attach(
        &bus,
        &[TRANSACTION_COMMITTED, TRANSACTION_COMPENSATED],
    );
    let coordinator = TransactionCoordinator::new(bus.clone());
    let log = Arc::new(Mutex::new(Vec::new()));

    let tx = coordinator.begin_transaction(None);
    coordinator
        .execute_in_transaction(
            &tx,
            "reserve-stock",
            EventModule::Inventory,
            || async { Ok::<_, std::io::Error>(()) },
            Some(logging_compensation(&log, 0, false)),
        )
        .await
        .unwrap();

    let result = coordinator
        .execute_in_transaction(
            &tx,
            "charge-card",
            EventModule::Sales,
            || async { Err::<(), _>("card declined") },
            Some(logging_compensation(&log, 1, false)),
        )
        .await;
    match result {
        Err(ExecutionError::Action { error, .. }) => assert_eq!(error, "card declined"),
        other => panic!("unexpected result: {other:?}"),
    }

    // The failed step itself is never compensated
    assert_eq!(*log.lock(), vec![0]);
    assert!(matches!(
        coordinator.commit_transaction(&tx).await,
        Err(CoordinatorError::TransactionNotActive { .. })
    ));

    bus.flush().await;
    assert_eq!(recorder.types(), vec![TRANSACTION_COMPENSATED]);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_transaction_cannot_commit() {
    let coordinator = TransactionCoordinator::new(EventBus::new());
    let log = Arc::new(Mutex::new(Vec::new()));

    let tx = coordinator.begin_transaction(None);
    coordinator
        .execute_in_transaction(
            &tx,
            "reserve-stock",
            EventModule::Inventory,
            || async { Ok::<_, std::io::Error>(()) },
            Some(logging_compensation(&log, 0, false)),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30) + Duration::from_millis(10)).await;

    assert_eq!(*log.lock(), vec![0]);
    let context = coordinator.get_transaction_status(&tx).unwrap();
    assert_eq!(context.status, TransactionStatus::Aborted);
    assert!(matches!(
        coordinator.commit_transaction(&tx).await,
        Err(CoordinatorError::TransactionNotActive { .. })
    ));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(coordinator.get_transaction_status(&tx).is_none());
}

#[tokio::test]
async fn test_active_transactions_are_listed_oldest_first() {
    let coordinator = TransactionCoordinator::new(EventBus::new());
    let first = coordinator.begin_transaction(None);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = coordinator.begin_transaction(None);

    let ids: Vec<String> = coordinator
        .get_active_transactions()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![first, second]);
    assert_eq!(coordinator.stats().active, 2);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_abort_compensates_completed_steps_in_reverse(plan in step_plan_strategy()) {
        let (attempted, statuses, events) = tokio_test::block_on(async {
            let bus = EventBus::new();
            let recorder = EventRecorder::attach(
                &bus,
                &[TRANSACTION_ABORTED, TRANSACTION_COMPENSATED, TRANSACTION_COMMITTED],
            );
            let coordinator = TransactionCoordinator::new(bus.clone());
            let log = Arc::new(Mutex::new(Vec::new()));

            let tx = coordinator.begin_transaction(None);
            let mut step_ids = Vec::new();
            for (index, (has_compensation, fails)) in plan.iter().enumerate() {
                let compensation =
                    has_compensation.then(|| logging_compensation(&log, index, *fails));
                let step_id = coordinator
                    .add_step(&tx, &format!("step-{index}"), EventModule::Inventory, json!({}), compensation)
                    .unwrap();
                coordinator.complete_step(&tx, &step_id).await.unwrap();
                step_ids.push(step_id);
            }

            coordinator.abort_transaction(&tx, Some("operator cancelled")).await.unwrap();
            bus.flush().await;

            let context = coordinator.get_transaction_status(&tx).unwrap();
            let statuses: Vec<StepStatus> = step_ids
                .iter()
                .map(|id| context.step(id).unwrap().status)
                .collect();
            let attempted = log.lock().clone();
            (attempted, statuses, recorder.types())
        });

        let expected_attempts: Vec<usize> = plan
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, (has_compensation, _))| *has_compensation)
            .map(|(index, _)| index)
            .collect();
        prop_assert_eq!(attempted, expected_attempts);

        for (status, (has_compensation, fails)) in statuses.iter().zip(&plan) {
            let expected = if *has_compensation && !*fails {
                StepStatus::Compensated
            } else {
                StepStatus::Completed
            };
            prop_assert_eq!(*status, expected);
        }

        prop_assert_eq!(events, vec![TRANSACTION_ABORTED, TRANSACTION_COMPENSATED]);
    }
}
