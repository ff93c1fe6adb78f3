use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use restbatch::batch_error;
use restbatch::concurrency::cancel::{CancelTx, create_cancel_channel};
use restbatch::coordinator::{
    CohortView, Operation, PhaseHook, PhaseSyncer, Settled, SubmitOptions, submit,
};
use restbatch::error::{BatchError, BatchResult, ErrorKind};
use restbatch_telemetry::tracing::init_test_tracing;
use tokio::sync::Barrier;
use tokio::time::{sleep, timeout};

use crate::support::{ConcurrencyProbe, outcome_kinds};

/// Runs four units stepping twice, where unit 1 fails with a domain error after its first
/// rendezvous.
async fn run_cohort_with_failing_unit(read_only: bool) -> Vec<Settled<usize>> {
    let units = (0..4)
        .map(|id| {
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    if id == 1 {
                        return Err(batch_error!(
                            ErrorKind::ValidationError,
                            "Invalid payload",
                            id
                        ));
                    }
                    syncer.phase().await?;
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect();

    submit(units, SubmitOptions::new(2).read_only(read_only)).await
}

/// Counts how many phases started.
#[derive(Debug, Default, Clone)]
struct CountPhases(Arc<AtomicUsize>);

impl CountPhases {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PhaseHook<()> for CountPhases {
    async fn before_phase(&self, _cohort: &CohortView<'_, ()>) -> BatchResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sequential_cohort_settles_in_submission_order() {
    init_test_tracing();

    let log = Arc::new(StdMutex::new(Vec::new()));
    let probe = ConcurrencyProbe::new();
    let phases = CountPhases::default();

    let units = (0..3)
        .map(|id| {
            let log = log.clone();
            let probe = probe.clone();
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    for phase in 0..2 {
                        syncer.phase().await?;
                        probe.enter();
                        log.lock().unwrap().push((id, phase));
                        probe.exit();
                    }
                    Ok::<_, BatchError>(format!("value-{id}"))
                },
            )
        })
        .collect();

    let settled = submit(units, SubmitOptions::new(1).with_hook(phases.clone())).await;

    let values: Vec<String> = settled
        .into_iter()
        .map(|settled| settled.into_result().unwrap())
        .collect();
    assert_eq!(values, vec!["value-0", "value-1", "value-2"]);

    // With a concurrency of one, units run one at a time and phases never overlap.
    let expected: Vec<(usize, usize)> = (0..2)
        .flat_map(|phase| (0..3).map(move |id| (id, phase)))
        .collect();
    assert_eq!(*log.lock().unwrap(), expected);
    assert_eq!(probe.max(), 1);

    // The first call to `phase()` only joins the cohort, so two calls make two phases.
    assert_eq!(phases.count(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn units_run_until_their_first_phase_before_any_hook() {
    init_test_tracing();

    let started = Arc::new(AtomicUsize::new(0));

    struct AssertAllStarted(Arc<AtomicUsize>);

    #[async_trait]
    impl PhaseHook<()> for AssertAllStarted {
        async fn before_phase(&self, cohort: &CohortView<'_, ()>) -> BatchResult<()> {
            if cohort.phase() == 0 && self.0.load(Ordering::SeqCst) != 4 {
                return Err(batch_error!(ErrorKind::InvalidState, "Units did not start"));
            }
            Ok(())
        }
    }

    let units = (0..4)
        .map(|id| {
            let started = started.clone();
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    syncer.phase().await?;
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect();

    let settled = submit(
        units,
        SubmitOptions::new(1).with_hook(AssertAllStarted(started.clone())),
    )
    .await;

    assert!(settled.iter().all(Settled::is_fulfilled));
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_unit_cancels_siblings() {
    init_test_tracing();

    let settled = run_cohort_with_failing_unit(false).await;

    assert_eq!(
        outcome_kinds(&settled),
        vec![
            Err(ErrorKind::SiblingCancelled),
            Err(ErrorKind::ValidationError),
            Err(ErrorKind::SiblingCancelled),
            Err(ErrorKind::SiblingCancelled),
        ]
    );

    let cancelled = settled[0].reason().unwrap();
    assert_eq!(cancelled.status(), 202);
    assert_eq!(cancelled.detail(), Some("unit 1 failed"));
    assert_eq!(settled[1].reason().unwrap().detail(), Some("1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_unit_in_read_only_cohort_does_not_cancel_siblings() {
    init_test_tracing();

    let settled = run_cohort_with_failing_unit(true).await;

    assert_eq!(
        outcome_kinds(&settled),
        vec![Ok(()), Err(ErrorKind::ValidationError), Ok(()), Ok(())]
    );
    assert_eq!(settled[3].value(), Some(&3));
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_submissions_settle_identically() {
    init_test_tracing();

    let first = run_cohort_with_failing_unit(false).await;
    let second = run_cohort_with_failing_unit(false).await;

    assert_eq!(outcome_kinds(&first), outcome_kinds(&second));
}

#[tokio::test(flavor = "multi_thread")]
async fn awake_units_never_exceed_concurrency() {
    init_test_tracing();

    let probe = ConcurrencyProbe::new();

    let units = (0..10)
        .map(|id| {
            let probe = probe.clone();
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    for _ in 0..3 {
                        probe.enter();
                        sleep(Duration::from_millis(2)).await;
                        probe.exit();
                        syncer.phase().await?;
                    }
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect();

    let settled = submit(units, SubmitOptions::new(3)).await;

    assert_eq!(settled.len(), 10);
    assert!(settled.iter().all(Settled::is_fulfilled));
    assert!(probe.max() <= 3, "{} units were awake at once", probe.max());
}

#[tokio::test(flavor = "multi_thread")]
async fn units_are_not_queued_when_concurrency_covers_the_cohort() {
    init_test_tracing();

    // Every unit waits for all the others inside the first phase, which only completes if
    // no unit is held back.
    let barrier = Arc::new(Barrier::new(5));

    let units = (0..5)
        .map(|id| {
            let barrier = barrier.clone();
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    barrier.wait().await;
                    syncer.phase().await?;
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect();

    let settled = timeout(Duration::from_secs(10), submit(units, SubmitOptions::new(5)))
        .await
        .expect("cohort stalled, some units were queued");

    assert!(settled.iter().all(Settled::is_fulfilled));
}

struct FailAtPhase(usize);

#[async_trait]
impl PhaseHook<()> for FailAtPhase {
    async fn before_phase(&self, cohort: &CohortView<'_, ()>) -> BatchResult<()> {
        if cohort.phase() == self.0 {
            return Err(batch_error!(ErrorKind::HookFailed, "Hook failed on purpose"));
        }
        Ok(())
    }
}

fn two_step_units(count: usize) -> Vec<((), impl Operation<(), Output = usize>)> {
    (0..count)
        .map(|id| {
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    syncer.phase().await?;
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_hook_fails_every_pending_unit() {
    init_test_tracing();

    let settled = submit(
        two_step_units(4),
        SubmitOptions::new(2).with_hook(FailAtPhase(1)),
    )
    .await;

    assert_eq!(outcome_kinds(&settled), vec![Err(ErrorKind::Internal); 4]);
    let reason = settled[0].reason().unwrap();
    assert_eq!(reason.status(), 500);
    assert!(reason.detail().unwrap().contains("HookFailed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_first_hook_fails_units_that_never_started() {
    init_test_tracing();

    let settled = submit(
        two_step_units(3),
        SubmitOptions::new(1).with_hook(FailAtPhase(0)),
    )
    .await;

    assert_eq!(outcome_kinds(&settled), vec![Err(ErrorKind::Internal); 3]);
}

#[tokio::test(flavor = "multi_thread")]
async fn client_cancellation_stops_the_cohort() {
    init_test_tracing();

    let (cancel_tx, cancel_rx) = create_cancel_channel();
    cancel_tx.cancel();

    let settled = submit(
        two_step_units(3),
        SubmitOptions::new(1).with_cancellation(cancel_rx),
    )
    .await;

    assert_eq!(
        outcome_kinds(&settled),
        vec![Err(ErrorKind::ClientCancelled); 3]
    );
    assert_eq!(settled[2].reason().unwrap().status(), 499);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_unit_is_settled_as_internal_error() {
    init_test_tracing();

    let units = (0..3)
        .map(|id| {
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    if id == 0 {
                        panic!("unit exploded");
                    }
                    syncer.phase().await?;
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect();

    let settled = submit(units, SubmitOptions::new(3)).await;

    assert_eq!(
        outcome_kinds(&settled),
        vec![
            Err(ErrorKind::Internal),
            Err(ErrorKind::SiblingCancelled),
            Err(ErrorKind::SiblingCancelled),
        ]
    );
    assert!(
        settled[0]
            .reason()
            .unwrap()
            .detail()
            .unwrap()
            .contains("UnitPanic")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unit_can_handle_cancellation_and_still_settles_as_cancelled() {
    init_test_tracing();

    let units = (0..2)
        .map(|id| {
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    if id == 0 {
                        return Err(batch_error!(ErrorKind::Conflict, "Conflict"));
                    }
                    // Swallow the cancellation, the record still reports it.
                    if syncer.phase().await.is_err() {
                        return Ok::<_, BatchError>("cleaned up");
                    }
                    Ok("done")
                },
            )
        })
        .collect();

    let settled = submit(units, SubmitOptions::new(2)).await;

    assert_eq!(
        outcome_kinds(&settled),
        vec![Err(ErrorKind::Conflict), Err(ErrorKind::SiblingCancelled)]
    );
}

/// Cancels the cohort on behalf of the client right before `phase` starts.
struct CancelBeforePhase {
    phase: usize,
    cancel_tx: CancelTx,
}

#[async_trait]
impl PhaseHook<()> for CancelBeforePhase {
    async fn before_phase(&self, cohort: &CohortView<'_, ()>) -> BatchResult<()> {
        if cohort.phase() == self.phase {
            self.cancel_tx.cancel();
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn client_cancellation_mid_cohort_keeps_finished_units() {
    init_test_tracing();

    let (cancel_tx, cancel_rx) = create_cancel_channel();

    // Units 0 and 1 finish within the first phase, units 2 and 3 keep stepping.
    let units = (0..4)
        .map(|id| {
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    if id < 2 {
                        return Ok::<_, BatchError>(id);
                    }
                    syncer.phase().await?;
                    syncer.phase().await?;
                    Ok(id)
                },
            )
        })
        .collect();

    let settled = submit(
        units,
        SubmitOptions::new(4)
            .with_cancellation(cancel_rx)
            .with_hook(CancelBeforePhase {
                phase: 1,
                cancel_tx,
            }),
    )
    .await;

    assert_eq!(
        outcome_kinds(&settled),
        vec![
            Ok(()),
            Ok(()),
            Err(ErrorKind::ClientCancelled),
            Err(ErrorKind::ClientCancelled),
        ]
    );
    assert_eq!(settled[1].value(), Some(&1));
}

/// Marks unit 2 doomed before the first phase and fails before the second one.
struct DoomThenFail;

#[async_trait]
impl PhaseHook<()> for DoomThenFail {
    async fn before_phase(&self, cohort: &CohortView<'_, ()>) -> BatchResult<()> {
        match cohort.phase() {
            0 => {
                cohort.state().mark_doomed(2);
                Ok(())
            }
            _ => Err(batch_error!(ErrorKind::HookFailed, "Hook failed on purpose")),
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_overrides_earlier_sibling_cancellation() {
    init_test_tracing();

    let units = (0..3usize)
        .map(|id| {
            (
                (),
                move |mut syncer: PhaseSyncer<()>| async move {
                    syncer.phase().await?;
                    match id {
                        0 => Err::<usize, _>(batch_error!(ErrorKind::Conflict, "Conflict")),
                        1 => {
                            // Cleans up long enough for the next phase to start without it.
                            if let Err(err) = syncer.phase().await {
                                sleep(Duration::from_millis(200)).await;
                                return Err(err);
                            }
                            Ok(id)
                        }
                        _ => {
                            syncer.phase().await?;
                            syncer.phase().await?;
                            Ok(id)
                        }
                    }
                },
            )
        })
        .collect();

    let settled = submit(units, SubmitOptions::new(3).with_hook(DoomThenFail)).await;

    assert_eq!(
        outcome_kinds(&settled),
        vec![
            Err(ErrorKind::Conflict),
            Err(ErrorKind::Internal),
            Err(ErrorKind::Internal),
        ]
    );
}
