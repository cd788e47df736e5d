//! # Fabric Substrate
//!
//! In-process stand-in for the entity replication layer. It owns the
//! authoritative entity components (inventories, buildings, market
//! listings, demographics) and routes commands between workers. The
//! auction house and the traders only ever talk through this surface,
//! never through shared memory.

use crate::types::*;
use crate::utils::{SystemError, SystemResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Component bag attached to a single entity
#[derive(Debug, Clone, Default)]
pub struct EntityComponents {
    /// Human-readable entity tag
    pub metadata: String,
    pub inventory: Option<TraderInventory>,
    pub buildings: Option<TraderBuildings>,
    /// Market listings keyed by commodity name (auction house entity only)
    pub listings: HashMap<String, MarketListing>,
    pub demographics: Option<DemographicInfo>,
}

/// A command in flight, carrying its reply channel
#[derive(Debug)]
pub struct CommandEnvelope {
    pub caller_worker: WorkerId,
    pub request: CommandRequest,
    pub reply: oneshot::Sender<SystemResult<CommandResponse>>,
}

impl CommandEnvelope {
    /// Send the reply, ignoring an already-gone caller
    pub fn respond(self, response: SystemResult<CommandResponse>) {
        let _ = self.reply.send(response);
    }
}

#[derive(Default)]
struct FabricState {
    entities: HashMap<EntityId, EntityComponents>,
    /// Authority routing: entity id -> inbox of the worker with authority
    routes: HashMap<EntityId, mpsc::UnboundedSender<CommandEnvelope>>,
    workers: HashMap<WorkerId, mpsc::UnboundedSender<CommandEnvelope>>,
}

/// The replication substrate shared by every worker in the process
pub struct Fabric {
    state: RwLock<FabricState>,
    next_entity_id: AtomicI64,
    next_worker_id: AtomicI64,
}

impl Fabric {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(FabricState::default()),
            // Entity ids start high enough to stay out of the way of
            // well-known partition ids
            next_entity_id: AtomicI64::new(100),
            next_worker_id: AtomicI64::new(1),
        }
    }

    /// Connect a worker, returning its id and command inbox
    pub fn register_worker(&self) -> (WorkerId, mpsc::UnboundedReceiver<CommandEnvelope>) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.write().expect("fabric lock poisoned");
        state.workers.insert(worker_id, sender);
        (worker_id, receiver)
    }

    /// Reserve `count` fresh entity ids
    pub fn reserve_entity_ids(&self, count: usize) -> SystemResult<Vec<EntityId>> {
        if count == 0 {
            return Err(SystemError::Fabric("cannot reserve zero ids".to_string()));
        }
        let first = self.next_entity_id.fetch_add(count as i64, Ordering::SeqCst);
        Ok((first..first + count as i64).collect())
    }

    /// Create an entity under a previously reserved id
    pub fn create_entity(&self, id: EntityId, components: EntityComponents) -> SystemResult<()> {
        let mut state = self.state.write().expect("fabric lock poisoned");
        if state.entities.contains_key(&id) {
            return Err(SystemError::Fabric(format!("entity {} already exists", id)));
        }
        state.entities.insert(id, components);
        Ok(())
    }

    /// Delete an entity and drop its authority route
    pub fn delete_entity(&self, id: EntityId) -> SystemResult<()> {
        let mut state = self.state.write().expect("fabric lock poisoned");
        if state.entities.remove(&id).is_none() {
            return Err(SystemError::Fabric(format!("unknown entity {}", id)));
        }
        state.routes.remove(&id);
        Ok(())
    }

    pub fn entity_exists(&self, id: EntityId) -> bool {
        let state = self.state.read().expect("fabric lock poisoned");
        state.entities.contains_key(&id)
    }

    /// Give a worker authority over an entity: commands addressed to the
    /// entity land in that worker's inbox from now on
    pub fn assign_partition(&self, worker_id: WorkerId, entity_id: EntityId) -> SystemResult<()> {
        let mut state = self.state.write().expect("fabric lock poisoned");
        let sender = state
            .workers
            .get(&worker_id)
            .cloned()
            .ok_or_else(|| SystemError::Fabric(format!("unknown worker {}", worker_id)))?;
        state.routes.insert(entity_id, sender);
        Ok(())
    }

    /// Send a command to the worker with authority over `target` and wait
    /// for the reply
    pub async fn send_command(
        &self,
        target: EntityId,
        caller_worker: WorkerId,
        request: CommandRequest,
        timeout: Duration,
    ) -> SystemResult<CommandResponse> {
        let route = {
            let state = self.state.read().expect("fabric lock poisoned");
            state.routes.get(&target).cloned()
        };
        let route = route
            .ok_or_else(|| SystemError::Fabric(format!("no authority over entity {}", target)))?;

        let (reply, waiter) = oneshot::channel();
        route
            .send(CommandEnvelope {
                caller_worker,
                request,
                reply,
            })
            .map_err(|_| SystemError::Fabric(format!("authority over {} is gone", target)))?;

        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => Err(SystemError::Fabric(format!(
                "command to {} dropped without reply",
                target
            ))),
            Err(_) => Err(SystemError::Timeout(format!(
                "command to {} exceeded {:?}",
                target, timeout
            ))),
        }
    }

    /// Read a snapshot of a trader inventory component
    pub fn read_inventory(&self, id: EntityId) -> Option<TraderInventory> {
        let state = self.state.read().expect("fabric lock poisoned");
        state.entities.get(&id).and_then(|e| e.inventory.clone())
    }

    /// Atomically read-modify-write a trader inventory. The closure runs
    /// under the fabric write lock, so concurrent settlements observe a
    /// consistent inventory.
    pub fn update_inventory<F, R>(&self, id: EntityId, mutate: F) -> SystemResult<R>
    where
        F: FnOnce(&mut TraderInventory) -> R,
    {
        let mut state = self.state.write().expect("fabric lock poisoned");
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or_else(|| SystemError::Fabric(format!("unknown entity {}", id)))?;
        let inventory = entity
            .inventory
            .as_mut()
            .ok_or_else(|| SystemError::Fabric(format!("entity {} has no inventory", id)))?;
        Ok(mutate(inventory))
    }

    /// Read a snapshot of a trader buildings component
    pub fn read_buildings(&self, id: EntityId) -> Option<TraderBuildings> {
        let state = self.state.read().expect("fabric lock poisoned");
        state.entities.get(&id).and_then(|e| e.buildings.clone())
    }

    /// Publish a market listing component update
    pub fn update_listing(&self, id: EntityId, listing: MarketListing) -> SystemResult<()> {
        let mut state = self.state.write().expect("fabric lock poisoned");
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or_else(|| SystemError::Fabric(format!("unknown entity {}", id)))?;
        entity
            .listings
            .insert(listing.commodity.name.clone(), listing);
        Ok(())
    }

    /// Read a market listing component
    pub fn read_listing(&self, id: EntityId, commodity: &str) -> Option<MarketListing> {
        let state = self.state.read().expect("fabric lock poisoned");
        state
            .entities
            .get(&id)
            .and_then(|e| e.listings.get(commodity).cloned())
    }

    /// Publish a demographics component update
    pub fn update_demographics(&self, id: EntityId, info: DemographicInfo) -> SystemResult<()> {
        let mut state = self.state.write().expect("fabric lock poisoned");
        let entity = state
            .entities
            .get_mut(&id)
            .ok_or_else(|| SystemError::Fabric(format!("unknown entity {}", id)))?;
        entity.demographics = Some(info);
        Ok(())
    }

    /// Read the demographics component
    pub fn read_demographics(&self, id: EntityId) -> Option<DemographicInfo> {
        let state = self.state.read().expect("fabric lock poisoned");
        state.entities.get(&id).and_then(|e| e.demographics.clone())
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reserve_ids_are_unique() {
        let fabric = Fabric::new();
        let first = fabric.reserve_entity_ids(3).unwrap();
        let second = fabric.reserve_entity_ids(2).unwrap();
        assert_eq!(first.len(), 3);
        for id in &second {
            assert!(!first.contains(id));
        }
    }

    #[test]
    fn test_create_and_delete_entity() {
        let fabric = Fabric::new();
        let id = fabric.reserve_entity_ids(1).unwrap()[0];
        fabric.create_entity(id, EntityComponents::default()).unwrap();
        assert!(fabric.entity_exists(id));
        assert!(fabric.create_entity(id, EntityComponents::default()).is_err());
        fabric.delete_entity(id).unwrap();
        assert!(!fabric.entity_exists(id));
    }

    #[test]
    fn test_update_inventory_is_atomic_rmw() {
        let fabric = Fabric::new();
        let id = fabric.reserve_entity_ids(1).unwrap()[0];
        let components = EntityComponents {
            inventory: Some(TraderInventory::new(50.0, 100.0)),
            ..Default::default()
        };
        fabric.create_entity(id, components).unwrap();

        let taken = fabric
            .update_inventory(id, |inv| {
                if inv.cash >= 40.0 {
                    inv.cash -= 40.0;
                    40.0
                } else {
                    0.0
                }
            })
            .unwrap();
        assert_eq!(taken, 40.0);
        assert_eq!(fabric.read_inventory(id).unwrap().cash, 60.0);
    }

    #[tokio::test]
    async fn test_command_routing_round_trip() {
        let fabric = Arc::new(Fabric::new());
        let (worker_id, mut inbox) = fabric.register_worker();
        let entity_id = fabric.reserve_entity_ids(1).unwrap()[0];
        fabric
            .create_entity(entity_id, EntityComponents::default())
            .unwrap();
        fabric.assign_partition(worker_id, entity_id).unwrap();

        let responder = tokio::spawn(async move {
            let envelope = inbox.recv().await.expect("envelope");
            assert!(matches!(envelope.request, CommandRequest::RequestProduction(_)));
            envelope.respond(Ok(CommandResponse::Production(ProductionResponse::default())));
        });

        let response = fabric
            .send_command(
                entity_id,
                worker_id,
                CommandRequest::RequestProduction(ProductionRequest { sender_id: entity_id }),
                Duration::from_millis(500),
            )
            .await
            .unwrap();
        assert!(matches!(response, CommandResponse::Production(_)));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_command_without_authority_fails() {
        let fabric = Fabric::new();
        let (worker_id, _inbox) = fabric.register_worker();
        let result = fabric
            .send_command(
                9999,
                worker_id,
                CommandRequest::RequestProduction(ProductionRequest { sender_id: 1 }),
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(SystemError::Fabric(_))));
    }
}
