//! Bounded worker pool for independent jobs.
//!
//! Workers claim jobs through a shared atomic counter. Jobs only read shared
//! data; their results are collected and applied to the store sequentially
//! once every job has finished.

use indexmap::map::Entry;
use indexmap::IndexMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::entity::FieldValue;
use crate::error::{GraphError, Result};
use crate::identity::{EntityRef, ScopedId};
use crate::model::{EntityKind, Trip};
use crate::record::Record;
use crate::store::EntityStore;

/// Worker count matching the available processors.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Run `job` over every `(key, input)` pair on at most `workers` threads.
///
/// Results come back in input order regardless of which worker ran them.
///
/// # Panics
///
/// Re-raises a panic from any worker thread.
pub fn run_partitioned<K, J, R, F>(jobs: &[(K, J)], workers: usize, job: F) -> Vec<R>
where
    K: Sync,
    J: Sync,
    R: Send,
    F: Fn(&K, &J) -> R + Sync,
{
    if jobs.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, jobs.len());
    let next_job = AtomicUsize::new(0);

    let mut results: Vec<(usize, R)> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let next_job = &next_job;
                let job = &job;

                s.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let idx = next_job.fetch_add(1, Ordering::Relaxed);
                        if idx >= jobs.len() {
                            break;
                        }
                        let (key, input) = &jobs[idx];
                        done.push((idx, job(key, input)));
                    }
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|h| match h.join() {
                Ok(done) => done,
                Err(e) => std::panic::resume_unwind(e),
            })
            .collect()
    });

    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, r)| r).collect()
}

/// Trips sharing a route and a service calendar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TripPartition {
    pub route: Option<EntityRef>,
    pub service: Option<EntityRef>,
}

/// Group trip identities by `(route, service)`, in order of first appearance.
pub fn partition_trips(store: &EntityStore) -> Vec<(TripPartition, Vec<ScopedId>)> {
    let mut groups: IndexMap<TripPartition, Vec<ScopedId>> = IndexMap::new();
    for trip in store.all::<Trip>() {
        let key = TripPartition {
            route: trip.route.clone(),
            service: trip.service.clone(),
        };
        groups.entry(key).or_default().push(trip.id.clone());
    }
    groups.into_iter().collect()
}

/// A field value computed by a job for one trip.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub trip: ScopedId,
    pub field: String,
    pub value: FieldValue,
}

/// Compute trip updates per `(route, service)` partition in parallel, then
/// apply them to the store in partition order.
///
/// Every write is staged on a copy of its trip before any trip is saved.
///
/// # Errors
///
/// Fails on the first job error, if a job writes a trip outside its own
/// partition, or if a write names an unknown trip field or a value the field
/// cannot hold. Nothing is written to the store in any of these cases.
pub fn enrich_trips<F>(store: &mut EntityStore, workers: usize, job: F) -> Result<usize>
where
    F: Fn(&EntityStore, &TripPartition, &[ScopedId]) -> Result<Vec<FieldWrite>> + Sync,
{
    let partitions = partition_trips(store);
    tracing::info!(
        "running {} trip partition(s) on up to {} worker(s)",
        partitions.len(),
        workers
    );

    let shared: &EntityStore = store;
    let outcomes = run_partitioned(&partitions, workers, |key, trips| {
        let writes = job(shared, key, trips.as_slice())?;
        if let Some(stray) = writes.iter().find(|w| !trips.contains(&w.trip)) {
            return Err(GraphError::Config(format!(
                "job for route {:?} wrote trip '{}' outside its partition",
                key.route.as_ref().map(|r| r.as_text()),
                stray.trip
            )));
        }
        Ok(writes)
    });

    let mut all_writes = Vec::new();
    for outcome in outcomes {
        all_writes.extend(outcome?);
    }
    let applied = all_writes.len();
    let mut staged: IndexMap<ScopedId, Record> = IndexMap::new();
    for write in all_writes {
        // enrichment never rekeys a trip
        if store.schema().field(EntityKind::Trip, &write.field).is_none() {
            return Err(GraphError::UnknownField {
                kind: EntityKind::Trip,
                field: write.field,
            });
        }
        let record = match staged.entry(write.trip) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let current = store
                    .get_by_id(EntityKind::Trip, entry.key())
                    .cloned()
                    .ok_or_else(|| GraphError::NotFound {
                        kind: EntityKind::Trip,
                        id: entry.key().to_string(),
                    })?;
                entry.insert(current)
            }
        };
        record.set(&write.field, write.value)?;
    }

    for record in staged.into_values() {
        store.save(record);
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Route;
    use crate::store::StoreConfig;

    fn sid(id: &str) -> ScopedId {
        ScopedId::new("A1", id)
    }

    #[test]
    fn test_results_come_back_in_job_order() {
        let jobs: Vec<(usize, u64)> = (0..50).map(|i| (i, i as u64)).collect();
        let results = run_partitioned(&jobs, 4, |key, input| (*key, input * 2));

        assert_eq!(results.len(), 50);
        for (i, (key, doubled)) in results.iter().enumerate() {
            assert_eq!(*key, i);
            assert_eq!(*doubled, (i as u64) * 2);
        }
    }

    #[test]
    fn test_empty_job_list() {
        let jobs: Vec<(u8, u8)> = Vec::new();
        assert!(run_partitioned(&jobs, 8, |_, _| 0).is_empty());
        assert!(default_workers() >= 1);
    }

    fn trip_store() -> EntityStore {
        let mut store = EntityStore::transit(StoreConfig::default()).unwrap();
        store.save(Route::new(sid("R1")));
        store.save(Route::new(sid("R2")));
        for (trip, route) in [("T1", "R1"), ("T2", "R1"), ("T3", "R2")] {
            let mut t = Trip::new(sid(trip));
            t.route = Some(EntityRef::Resolved(sid(route)));
            store.save(t);
        }
        store
    }

    #[test]
    fn test_partition_trips_by_route_and_service() {
        let store = trip_store();
        let partitions = partition_trips(&store);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].1, vec![sid("T1"), sid("T2")]);
        assert_eq!(partitions[1].1, vec![sid("T3")]);
    }

    #[test]
    fn test_enrich_trips_applies_results_after_jobs() {
        let mut store = trip_store();

        let applied = enrich_trips(&mut store, 2, |_store, key, trips| {
            let label = key.route.as_ref().map(|r| r.as_text()).unwrap_or_default();
            Ok(trips
                .iter()
                .map(|trip| FieldWrite {
                    trip: trip.clone(),
                    field: "headsign".to_string(),
                    value: FieldValue::String(format!("via {}", label)),
                })
                .collect())
        })
        .unwrap();

        assert_eq!(applied, 3);
        assert_eq!(store.get::<Trip>(&sid("T3")).unwrap().headsign.as_deref(), Some("via A1_R2"));
    }

    #[test]
    fn test_enrich_trips_rejects_writes_outside_partition() {
        let mut store = trip_store();

        let result = enrich_trips(&mut store, 2, |_store, _key, _trips| {
            Ok(vec![FieldWrite {
                trip: sid("T1"),
                field: "headsign".to_string(),
                value: FieldValue::String("x".to_string()),
            }])
        });

        assert!(matches!(result, Err(GraphError::Config(_))));
        assert_eq!(store.get::<Trip>(&sid("T1")).unwrap().headsign, None);
    }

    #[test]
    fn test_enrich_trips_bad_write_leaves_store_unchanged() {
        for (field, value) in [
            ("headsgin", FieldValue::String("x".to_string())),
            ("direction_id", FieldValue::String("north".to_string())),
        ] {
            let mut store = trip_store();

            // T1 and T2 share a partition, so the valid write is staged first
            let result = enrich_trips(&mut store, 1, |_store, _key, trips| {
                let mut writes = vec![FieldWrite {
                    trip: trips[0].clone(),
                    field: "headsign".to_string(),
                    value: FieldValue::String("staged".to_string()),
                }];
                if let Some(second) = trips.get(1) {
                    writes.push(FieldWrite {
                        trip: second.clone(),
                        field: field.to_string(),
                        value: value.clone(),
                    });
                }
                Ok(writes)
            });

            assert!(result.is_err(), "{}", field);
            for trip in ["T1", "T2", "T3"] {
                assert_eq!(store.get::<Trip>(&sid(trip)).unwrap().headsign, None);
            }
        }
    }
}
