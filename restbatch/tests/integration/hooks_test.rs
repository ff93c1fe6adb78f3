use restbatch::coordinator::{PhaseSyncer, SubmitOptions, submit};
use restbatch::error::{BatchError, ErrorKind};
use restbatch::hooks::{
    BulkMutationHook, KeyedLookupHook, LookupContext, LookupTable, MemoryStore, MutationContext,
    MutationQueue, RowMutation,
};
use restbatch_telemetry::tracing::init_test_tracing;

use crate::support::outcome_kinds;

#[derive(Debug, Default)]
struct LookupOnly {
    lookups: LookupTable<u32, String>,
}

impl LookupContext<u32, String> for LookupOnly {
    fn lookups(&mut self) -> &mut LookupTable<u32, String> {
        &mut self.lookups
    }
}

#[derive(Debug, Default)]
struct WriteOnly {
    mutations: MutationQueue<RowMutation<u32, String>>,
}

impl MutationContext<RowMutation<u32, String>> for WriteOnly {
    fn mutations(&mut self) -> &mut MutationQueue<RowMutation<u32, String>> {
        &mut self.mutations
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lookups_registered_by_every_unit_are_resolved_with_one_load() {
    init_test_tracing();

    let store = MemoryStore::with_rows((0..4u32).map(|id| (id, format!("user-{id}"))));

    let units = (0..5u32)
        .map(|id| {
            (
                LookupOnly::default(),
                move |mut syncer: PhaseSyncer<LookupOnly>| async move {
                    syncer.context().await.lookups().request(id);
                    syncer.phase().await?;

                    let value = syncer.context().await.lookups.get(&id).flatten().cloned();
                    Ok::<_, BatchError>(value)
                },
            )
        })
        .collect();

    let settled = submit(
        units,
        SubmitOptions::new(2).with_hook(KeyedLookupHook::new(store.clone())),
    )
    .await;

    let values: Vec<Option<String>> = settled
        .into_iter()
        .map(|settled| settled.into_result().unwrap())
        .collect();
    assert_eq!(
        values,
        vec![
            Some("user-0".to_string()),
            Some("user-1".to_string()),
            Some("user-2".to_string()),
            Some("user-3".to_string()),
            None,
        ]
    );
    assert_eq!(store.load_calls().await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn row_failures_doom_their_units_and_cancel_the_others() {
    init_test_tracing();

    let store = MemoryStore::with_rows([(1u32, "existing".to_string())]);

    // Units 2 and 3 insert a key that already exists.
    let units = (0..4u32)
        .map(|id| {
            let key = if id >= 2 { 1 } else { 10 + id };
            (
                WriteOnly::default(),
                move |mut syncer: PhaseSyncer<WriteOnly>| async move {
                    syncer
                        .context()
                        .await
                        .mutations
                        .push(RowMutation::Insert(key, format!("row-{id}")));
                    syncer.phase().await?;

                    let failure = syncer.context().await.mutations.take_failure();
                    if let Some(failure) = failure {
                        return Err(failure);
                    }

                    syncer.phase().await?;
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect();

    let settled = submit(
        units,
        SubmitOptions::new(4).with_hook(BulkMutationHook::new(store.clone())),
    )
    .await;

    // The doomed units report their own row failure, only the healthy ones are cancelled.
    assert_eq!(
        outcome_kinds(&settled),
        vec![
            Err(ErrorKind::SiblingCancelled),
            Err(ErrorKind::SiblingCancelled),
            Err(ErrorKind::Conflict),
            Err(ErrorKind::Conflict),
        ]
    );
    assert_eq!(store.write_calls().await, 1);
    assert_eq!(store.get(&10).await, Some("row-0".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_writes_are_applied_once_per_phase() {
    init_test_tracing();

    let store = MemoryStore::<u32, String>::new();

    let units = (0..6u32)
        .map(|id| {
            (
                WriteOnly::default(),
                move |mut syncer: PhaseSyncer<WriteOnly>| async move {
                    for round in 0..2u32 {
                        syncer
                            .context()
                            .await
                            .mutations
                            .push(RowMutation::Insert(id * 10 + round, format!("{id}-{round}")));
                        syncer.phase().await?;
                    }

                    let applied = syncer.context().await.mutations.applied();
                    Ok::<_, BatchError>(applied)
                },
            )
        })
        .collect();

    let settled = submit(
        units,
        SubmitOptions::new(3).with_hook(BulkMutationHook::new(store.clone())),
    )
    .await;

    for settled in settled {
        assert_eq!(settled.into_result().unwrap(), 2);
    }
    assert_eq!(store.write_calls().await, 2);
    assert_eq!(store.len().await, 12);
}

#[tokio::test(flavor = "multi_thread")]
async fn failing_loader_fails_the_cohort() {
    init_test_tracing();

    struct BrokenLoader;

    impl restbatch::hooks::BulkLoader for BrokenLoader {
        type Key = u32;
        type Value = String;

        async fn load(
            &self,
            _keys: Vec<u32>,
        ) -> restbatch::error::BatchResult<std::collections::HashMap<u32, String>> {
            Err(restbatch::batch_error!(
                ErrorKind::StoreUnavailable,
                "Store is down"
            ))
        }
    }

    let units = (0..3u32)
        .map(|id| {
            (
                LookupOnly::default(),
                move |mut syncer: PhaseSyncer<LookupOnly>| async move {
                    syncer.context().await.lookups().request(id);
                    syncer.phase().await?;
                    Ok::<_, BatchError>(id)
                },
            )
        })
        .collect();

    let settled = submit(
        units,
        SubmitOptions::new(3).with_hook(KeyedLookupHook::new(BrokenLoader)),
    )
    .await;

    assert_eq!(outcome_kinds(&settled), vec![Err(ErrorKind::Internal); 3]);
}
