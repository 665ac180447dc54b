use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Exclusive hold on one entity. The slot is forgotten on release once no
/// other task holds or waits for it.
pub struct Guard {
    held: Option<OwnedMutexGuard<()>>,
    key: String,
    slots: Slots,
}

impl Drop for Guard {
    fn drop(&mut self) {
        drop(self.held.take());
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the slot under the map lock, so a count of one means
        // nobody else can reach it.
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

/// One async mutex per entity, created on first use.
///
/// Writers of occupancy and assignment fields hold the relevant entity
/// locks for the whole check-and-mutate sequence. When several locks are
/// needed they are taken student first, then supervisor, then project.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Slots,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock(&self, key: String) -> Guard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        Guard {
            held: Some(slot.lock_owned().await),
            key,
            slots: Arc::clone(&self.slots),
        }
    }

    pub async fn student(&self, id: &str) -> Guard {
        self.lock(format!("student:{id}")).await
    }

    pub async fn supervisor(&self, id: &str) -> Guard {
        self.lock(format!("supervisor:{id}")).await
    }

    pub async fn project(&self, id: &str) -> Guard {
        self.lock(format!("project:{id}")).await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let guard = locks.project("p1").await;
        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = other.project("p1").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn keys_do_not_collide_across_entities() {
        let locks = KeyedLocks::new();
        let _student = locks.student("x").await;
        let _project = locks.project("x").await;
        let _supervisor = locks.supervisor("x").await;
        assert_eq!(locks.len(), 3);
    }

    #[tokio::test]
    async fn released_slots_are_forgotten() {
        let locks = KeyedLocks::new();
        for i in 0..1000 {
            drop(locks.student(&format!("ghost{i}")).await);
        }
        assert_eq!(locks.len(), 0);

        let first = locks.student("s1").await;
        let second = locks.project("p1").await;
        drop(first);
        assert_eq!(locks.len(), 1);
        drop(second);
        assert_eq!(locks.len(), 0);
    }
}
