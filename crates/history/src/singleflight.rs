//! In-process request coalescing.
//!
//! At most one fetch per key runs inside one process; concurrent callers
//! for the same key share the leader's outcome. Entries live exactly as
//! long as the underlying operation: completion clears the slot, and so
//! does dropping a leader that never completed, so a panic cannot poison a
//! key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Outcome delivered to every caller of one flight. Both sides are
/// `Arc`-wrapped so the broadcast can clone them to each waiter.
pub type FlightOutcome<T, E> = Result<Arc<T>, Arc<E>>;

type FlightMap<T, E> = Arc<Mutex<HashMap<String, broadcast::Sender<FlightOutcome<T, E>>>>>;

/// Coalesces concurrent requests for the same key into one in-flight
/// computation.
pub struct SingleFlight<T, E> {
    inflight: FlightMap<T, E>,
}

impl<T, E> SingleFlight<T, E> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Join the flight for `key`: the first caller becomes the leader and
    /// must run the work, everyone else follows the leader's outcome.
    pub fn join(&self, key: &str) -> Flight<T, E> {
        let mut map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = map.get(key) {
            return Flight::Follower(tx.subscribe());
        }
        let (tx, _rx) = broadcast::channel(1);
        map.insert(key.to_string(), tx.clone());
        Flight::Leader(FlightLeader {
            key: key.to_string(),
            inflight: Arc::clone(&self.inflight),
            tx,
            completed: false,
        })
    }

    /// Subscribe to an existing flight without ever becoming the leader.
    /// Returns `None` when nothing is in flight for `key`.
    pub fn subscribe(&self, key: &str) -> Option<broadcast::Receiver<FlightOutcome<T, E>>> {
        let map = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        map.get(key).map(|tx| tx.subscribe())
    }

    /// Number of in-flight keys (observability).
    pub fn len(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> Clone for SingleFlight<T, E> {
    fn clone(&self) -> Self {
        Self {
            inflight: Arc::clone(&self.inflight),
        }
    }
}

/// Role assigned to a caller joining a flight.
pub enum Flight<T, E> {
    /// This caller runs the work and must call [`FlightLeader::complete`].
    Leader(FlightLeader<T, E>),
    /// Another in-process caller is already running the work.
    Follower(broadcast::Receiver<FlightOutcome<T, E>>),
}

/// The leading caller's handle on a flight.
pub struct FlightLeader<T, E> {
    key: String,
    inflight: FlightMap<T, E>,
    tx: broadcast::Sender<FlightOutcome<T, E>>,
    completed: bool,
}

impl<T, E> FlightLeader<T, E> {
    /// Publish the outcome to every follower and clear the slot.
    pub fn complete(mut self, outcome: FlightOutcome<T, E>) {
        self.completed = true;
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
        // No receivers is fine: the leader may have been alone.
        let _ = self.tx.send(outcome);
    }
}

impl<T, E> Drop for FlightLeader<T, E> {
    fn drop(&mut self) {
        // A leader that unwound before completing must not leave a dangling
        // slot; followers observe the closed channel and fall back.
        if !self.completed {
            self.inflight
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn followers_share_the_leaders_value() {
        let flights: SingleFlight<u32, String> = SingleFlight::new();

        let leader = match flights.join("k") {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("first join must lead"),
        };
        let mut follower = match flights.join("k") {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("second join must follow"),
        };

        leader.complete(Ok(Arc::new(42)));
        let outcome = follower.recv().await.unwrap();
        assert_eq!(*outcome.unwrap(), 42);
        assert!(flights.is_empty(), "completion must clear the slot");
    }

    #[tokio::test]
    async fn followers_share_the_leaders_error() {
        let flights: SingleFlight<u32, String> = SingleFlight::new();

        let leader = match flights.join("k") {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("first join must lead"),
        };
        let mut follower = match flights.join("k") {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("second join must follow"),
        };

        leader.complete(Err(Arc::new("quota".to_string())));
        let outcome = follower.recv().await.unwrap();
        assert_eq!(*outcome.unwrap_err(), "quota");
        // The failure does not poison the key: the next join leads again.
        assert!(matches!(flights.join("k"), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn dropped_leader_clears_the_slot() {
        let flights: SingleFlight<u32, String> = SingleFlight::new();

        let leader = match flights.join("k") {
            Flight::Leader(leader) => leader,
            Flight::Follower(_) => panic!("first join must lead"),
        };
        let mut follower = match flights.join("k") {
            Flight::Follower(rx) => rx,
            Flight::Leader(_) => panic!("second join must follow"),
        };

        drop(leader);
        assert!(flights.is_empty());
        assert!(follower.recv().await.is_err(), "channel closes without a value");
        assert!(matches!(flights.join("k"), Flight::Leader(_)));
    }

    #[tokio::test]
    async fn distinct_keys_fly_independently() {
        let flights: SingleFlight<u32, String> = SingleFlight::new();
        let a = flights.join("a");
        let b = flights.join("b");
        assert!(matches!(a, Flight::Leader(_)));
        assert!(matches!(b, Flight::Leader(_)));
        assert_eq!(flights.len(), 2);
    }

    #[test]
    fn subscribe_without_flight_is_none() {
        let flights: SingleFlight<u32, String> = SingleFlight::new();
        assert!(flights.subscribe("nothing").is_none());
    }
}
