//! Live queries over the local store.
//!
//! A [`LiveQuery`] emits the current result first, then waits for the next
//! local mutation and emits again. It never finishes on its own; drop it to
//! unsubscribe. Notifications are coalesced, so a slow consumer sees the
//! latest state rather than every intermediate one.
//!
//! [`LiveQuery::next`] is cancel safe: a query already running when the
//! future is dropped is picked up again by the following call.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::db::LocalStore;
use crate::error::StoreResult;

type Query<T> = Arc<dyn Fn(&LocalStore) -> StoreResult<T> + Send + Sync>;

fn spawn_query<T: Send + 'static>(
    store: &Arc<LocalStore>,
    query: &Query<T>,
) -> JoinHandle<StoreResult<T>> {
    let store = Arc::clone(store);
    let query = Arc::clone(query);
    tokio::task::spawn_blocking(move || query(&store))
}

/// Continuously updating view over the local store
pub struct LiveQuery<T> {
    store: Arc<LocalStore>,
    changes: watch::Receiver<u64>,
    query: Query<T>,
    primed: bool,
    in_flight: Option<JoinHandle<StoreResult<T>>>,
}

impl<T: Send + 'static> LiveQuery<T> {
    pub fn new<F>(store: Arc<LocalStore>, query: F) -> Self
    where
        F: Fn(&LocalStore) -> StoreResult<T> + Send + Sync + 'static,
    {
        let changes = store.subscribe();
        Self {
            store,
            changes,
            query: Arc::new(query),
            primed: false,
            in_flight: None,
        }
    }

    /// Wait for the next emission.
    ///
    /// The first call resolves immediately with the current view.
    pub async fn next(&mut self) -> StoreResult<T> {
        if self.in_flight.is_none() {
            if self.primed {
                // Sender lives in `self.store`; never closed here.
                let _ = self.changes.changed().await;
            }
            self.primed = true;
            self.changes.borrow_and_update();
        }

        let handle = self
            .in_flight
            .get_or_insert_with(|| spawn_query(&self.store, &self.query));
        let result = handle.await;
        self.in_flight = None;
        result?
    }

    /// Run the query once without waiting for changes.
    pub async fn snapshot(&self) -> StoreResult<T> {
        spawn_query(&self.store, &self.query).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::TaskFilter;
    use crate::models::Task;
    use std::time::Duration;

    fn titles(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|t| t.title.as_str()).collect()
    }

    #[tokio::test]
    async fn emits_current_view_then_each_change() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        store
            .insert(&Task {
                id: 1,
                ..Task::new("first")
            })
            .unwrap();

        let mut live = LiveQuery::new(Arc::clone(&store), |s| s.list(&TaskFilter::Pending));
        assert_eq!(titles(&live.next().await.unwrap()), vec!["first"]);

        let writer = Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer
                .insert(&Task {
                    id: 2,
                    ..Task::new("second")
                })
                .unwrap();
        });

        let next = tokio::time::timeout(Duration::from_secs(2), live.next())
            .await
            .expect("live query should re-emit")
            .unwrap();
        assert_eq!(titles(&next), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn waits_while_nothing_changes() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let mut live = LiveQuery::new(store, |s| s.labels());
        live.next().await.unwrap();

        let pending = tokio::time::timeout(Duration::from_millis(50), live.next()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn dropped_emission_is_resumed() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let mut live = LiveQuery::new(Arc::clone(&store), |s| {
            std::thread::sleep(Duration::from_millis(100));
            s.list(&TaskFilter::All)
        });
        assert!(live.next().await.unwrap().is_empty());

        store.insert(&Task { id: 9, ..Task::new("late") }).unwrap();
        let cut_short = tokio::time::timeout(Duration::from_millis(20), live.next()).await;
        assert!(cut_short.is_err());

        let resumed = tokio::time::timeout(Duration::from_millis(800), live.next())
            .await
            .expect("pending change should still be delivered")
            .unwrap();
        assert_eq!(titles(&resumed), vec!["late"]);
    }

    #[tokio::test]
    async fn independent_subscribers_each_start_cold() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        store.insert(&Task { id: 4, ..Task::new("x") }).unwrap();

        let mut a = LiveQuery::new(Arc::clone(&store), |s| s.get(4));
        store.delete(4).unwrap();
        let mut b = LiveQuery::new(Arc::clone(&store), |s| s.get(4));

        assert_eq!(a.next().await.unwrap(), None);
        assert_eq!(b.next().await.unwrap(), None);
    }
}
