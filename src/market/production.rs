//! # Production Engine
//!
//! Per-trader, per-tick recipe evaluation executed by the auction house
//! on behalf of the requesting trader. Exactly one recipe runs per tick:
//! the highest-priority building whose requirements are all on hand.

use crate::fabric::Fabric;
use crate::types::*;
use crate::utils::{SystemError, SystemResult};
use log::debug;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Evaluates building recipes against fabric-held inventories
pub struct ProductionEngine {
    fabric: Arc<Fabric>,
}

impl ProductionEngine {
    pub fn new(fabric: Arc<Fabric>) -> Self {
        Self { fabric }
    }

    /// Run one production step for a trader. Requirements are consumed
    /// before products are produced, so a recipe cannot feed on its own
    /// output within a tick.
    pub fn tick_production<R: Rng>(
        &self,
        trader_id: EntityId,
        commodities: &HashMap<String, Commodity>,
        rng: &mut R,
    ) -> SystemResult<ProductionResponse> {
        let inventory = self
            .fabric
            .read_inventory(trader_id)
            .ok_or_else(|| SystemError::Production(format!("trader {} has no inventory", trader_id)))?;
        let buildings = self
            .fabric
            .read_buildings(trader_id)
            .ok_or_else(|| SystemError::Production(format!("trader {} has no buildings", trader_id)))?;

        let mut ordered: Vec<&Building> = buildings.buildings.iter().collect();
        ordered.sort_by_key(|b| b.priority);

        for building in ordered {
            if !requirements_met(&building.requires, &inventory) {
                continue;
            }

            let mut working = inventory.clone();
            let mut response = ProductionResponse::default();

            for requirement in &building.requires {
                if chance_fires(requirement.chance, rng) {
                    let actual = consume_item(&mut working, &requirement.commodity, requirement.quantity);
                    response.consumed.insert(requirement.commodity.clone(), actual);
                }
            }
            for product in &building.produces {
                if chance_fires(product.chance, rng) {
                    let unit_size = unit_size_of(&product.commodity, commodities, &working);
                    let actual = produce_item(&mut working, &product.commodity, product.quantity, unit_size);
                    response.produced.insert(product.commodity.clone(), actual);
                    response.overproduced.insert(product.commodity.clone(), product.quantity - actual);
                }
            }

            response.bankrupt = working.cash < 0.0;
            debug!(
                "Trader {} ran {}: produced {:?}, consumed {:?}",
                trader_id, building.name, response.produced, response.consumed
            );
            self.fabric.update_inventory(trader_id, move |inv| *inv = working)?;
            return Ok(response);
        }

        // no recipe could run: charge the idle tax
        let cash_after = self
            .fabric
            .update_inventory(trader_id, |inv| {
                inv.cash -= buildings.idle_tax;
                inv.cash
            })?;
        debug!("Trader {} idle, taxed ${:.2}", trader_id, buildings.idle_tax);
        Ok(ProductionResponse {
            bankrupt: cash_after < 0.0,
            ..Default::default()
        })
    }
}

fn requirements_met(requirements: &[RecipeEntry], inventory: &TraderInventory) -> bool {
    requirements
        .iter()
        .all(|req| inventory.has_item(&req.commodity, req.quantity))
}

fn chance_fires<R: Rng>(chance: f64, rng: &mut R) -> bool {
    chance >= 1.0 || rng.random::<f64>() < chance
}

/// Take up to `quantity` from the working inventory, never below zero
fn consume_item(inventory: &mut TraderInventory, commodity: &str, quantity: Quantity) -> Quantity {
    let Some(item) = inventory.items.get_mut(commodity) else {
        return 0;
    };
    let actual = quantity.min(item.quantity);
    item.quantity -= actual;
    actual
}

/// Store up to `quantity`, capped by what fits in the remaining space
fn produce_item(
    inventory: &mut TraderInventory,
    commodity: &str,
    quantity: Quantity,
    unit_size: f64,
) -> Quantity {
    let fits = (inventory.free_space() / unit_size).floor() as Quantity;
    let actual = quantity.min(fits.max(0));
    let entry = inventory.items.entry(commodity.to_string()).or_insert(InventoryItem {
        unit_size,
        quantity: 0,
    });
    entry.quantity += actual;
    actual
}

fn unit_size_of(
    commodity: &str,
    commodities: &HashMap<String, Commodity>,
    inventory: &TraderInventory,
) -> f64 {
    commodities
        .get(commodity)
        .map(|c| c.unit_size)
        .or_else(|| inventory.items.get(commodity).map(|i| i.unit_size))
        .unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::EntityComponents;
    use crate::utils::testing::create_test_inventory;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn certain(commodity: &str, quantity: Quantity) -> RecipeEntry {
        RecipeEntry::new(commodity, quantity, 1.0)
    }

    fn metal_recipes() -> TraderBuildings {
        TraderBuildings {
            buildings: vec![
                Building {
                    produces: vec![certain("metal", 1)],
                    requires: vec![certain("wood", 1)],
                    priority: 1,
                    name: "wood-smelter".to_string(),
                    repeatable: false,
                },
                Building {
                    produces: vec![certain("metal", 1)],
                    requires: vec![certain("food", 1)],
                    priority: 2,
                    name: "food-smelter".to_string(),
                    repeatable: false,
                },
            ],
            idle_tax: 20.0,
        }
    }

    fn setup(inventory: TraderInventory, buildings: TraderBuildings) -> (Arc<Fabric>, EntityId) {
        let fabric = Arc::new(Fabric::new());
        let id = fabric.reserve_entity_ids(1).unwrap()[0];
        fabric
            .create_entity(
                id,
                EntityComponents {
                    inventory: Some(inventory),
                    buildings: Some(buildings),
                    ..Default::default()
                },
            )
            .unwrap();
        (fabric, id)
    }

    fn test_commodities() -> HashMap<String, Commodity> {
        [
            ("wood", Commodity::new("wood", 1.0, 3011)),
            ("food", Commodity::new("food", 0.5, 3010)),
            ("metal", Commodity::new("metal", 1.0, 3014)),
        ]
        .into_iter()
        .map(|(name, c)| (name.to_string(), c))
        .collect()
    }

    #[test]
    fn test_lowest_priority_recipe_wins_then_yields() {
        let inventory = create_test_inventory(100.0, &[("wood", 1.0, 1), ("food", 0.5, 1)]);
        let (fabric, id) = setup(inventory, metal_recipes());
        let engine = ProductionEngine::new(fabric.clone());
        let commodities = test_commodities();
        let mut rng = StdRng::seed_from_u64(7);

        let first = engine.tick_production(id, &commodities, &mut rng).unwrap();
        assert_eq!(first.consumed.get("wood"), Some(&1));
        assert_eq!(first.consumed.get("food"), None);
        assert_eq!(first.produced.get("metal"), Some(&1));

        // wood is gone, priority 2 takes over
        let second = engine.tick_production(id, &commodities, &mut rng).unwrap();
        assert_eq!(second.consumed.get("food"), Some(&1));
        assert_eq!(second.produced.get("metal"), Some(&1));

        let inv = fabric.read_inventory(id).unwrap();
        assert_eq!(inv.quantity_of("wood"), 0);
        assert_eq!(inv.quantity_of("food"), 0);
        assert_eq!(inv.quantity_of("metal"), 2);
    }

    #[test]
    fn test_overproduction_capped_by_capacity() {
        let mut inventory = create_test_inventory(100.0, &[("wood", 1.0, 1)]);
        inventory.capacity = 3.0;
        let buildings = TraderBuildings {
            buildings: vec![Building {
                produces: vec![certain("metal", 10)],
                requires: vec![certain("wood", 1)],
                priority: 1,
                name: "smelter".to_string(),
                repeatable: false,
            }],
            idle_tax: 20.0,
        };
        let (fabric, id) = setup(inventory, buildings);
        let engine = ProductionEngine::new(fabric.clone());
        let mut rng = StdRng::seed_from_u64(1);

        let result = engine.tick_production(id, &test_commodities(), &mut rng).unwrap();
        // wood consumed first, freeing one unit of space for three metal
        assert_eq!(result.produced.get("metal"), Some(&3));
        assert_eq!(result.overproduced.get("metal"), Some(&7));
        assert_eq!(fabric.read_inventory(id).unwrap().quantity_of("metal"), 3);
    }

    #[test]
    fn test_idle_tax_and_bankruptcy() {
        let inventory = create_test_inventory(10.0, &[]);
        let (fabric, id) = setup(inventory, metal_recipes());
        let engine = ProductionEngine::new(fabric.clone());
        let mut rng = StdRng::seed_from_u64(1);
        let commodities = test_commodities();

        let first = engine.tick_production(id, &commodities, &mut rng).unwrap();
        assert!(first.bankrupt);
        assert!(first.produced.is_empty());
        assert!((fabric.read_inventory(id).unwrap().cash - (-10.0)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_components_is_an_error() {
        let fabric = Arc::new(Fabric::new());
        let id = fabric.reserve_entity_ids(1).unwrap()[0];
        fabric
            .create_entity(
                id,
                EntityComponents {
                    inventory: Some(create_test_inventory(10.0, &[])),
                    ..Default::default()
                },
            )
            .unwrap();
        let engine = ProductionEngine::new(fabric);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(engine
            .tick_production(id, &test_commodities(), &mut rng)
            .is_err());
    }

    #[test]
    fn test_consume_never_goes_negative() {
        let mut inventory = create_test_inventory(0.0, &[("wood", 1.0, 2)]);
        assert_eq!(consume_item(&mut inventory, "wood", 5), 2);
        assert_eq!(inventory.quantity_of("wood"), 0);
        assert_eq!(consume_item(&mut inventory, "ore", 1), 0);
    }
}
