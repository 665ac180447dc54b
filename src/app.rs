use crate::allocation::Allocations;
use crate::catalog::Catalog;
use crate::directory::Directory;
use crate::identity::Identity;
use crate::locks::KeyedLocks;
use crate::progress::Ledger;
use crate::store::RecordStore;
use std::sync::Arc;

/// Every service, wired to one record store and one set of entity locks.
pub struct App {
    pub store: Arc<dyn RecordStore>,
    pub identity: Identity,
    pub directory: Directory,
    pub catalog: Catalog,
    pub allocations: Allocations,
    pub ledger: Ledger,
}

impl App {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        let locks = Arc::new(KeyedLocks::new());
        Self {
            identity: Identity::new(Arc::clone(&store)),
            directory: Directory::new(Arc::clone(&store), Arc::clone(&locks)),
            catalog: Catalog::new(Arc::clone(&store), Arc::clone(&locks)),
            allocations: Allocations::new(Arc::clone(&store), Arc::clone(&locks)),
            ledger: Ledger::new(Arc::clone(&store), locks),
            store,
        }
    }
}
