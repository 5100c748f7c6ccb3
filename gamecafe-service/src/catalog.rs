use std::sync::Arc;

use shared::{ConsoleStatus, Error, Requester};
use tracing::info;
use uuid::Uuid;

use crate::models::Console;
use crate::store::Store;

/// Catalog of bookable consoles. Double-booking is decided by the booking
/// ledger's overlap query; a console's `maintenance` status is an
/// administrative override that blocks new reservations, and `in_use` is
/// informational only.
#[derive(Clone)]
pub struct ConsoleCatalog {
    store: Arc<dyn Store>,
}

impl ConsoleCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get(&self, id: Uuid) -> Result<Console, Error> {
        self.store
            .get_console(id)
            .await?
            .ok_or(Error::NotFound("console"))
    }

    pub async fn list_available(&self) -> Result<Vec<Console>, Error> {
        self.store.list_available_consoles().await
    }

    pub async fn set_status(
        &self,
        requester: Requester,
        id: Uuid,
        status: ConsoleStatus,
    ) -> Result<(), Error> {
        if !requester.admin {
            return Err(Error::Forbidden);
        }
        if !self.store.set_console_status(id, status).await? {
            return Err(Error::NotFound("console"));
        }
        info!("console {} status set to {}", id, status.as_str());
        Ok(())
    }
}
