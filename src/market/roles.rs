//! # Trader Roles
//!
//! The canonical commodity table, the producer mapping, market-driven
//! weighted role selection, and the per-role blueprints (buildings,
//! starting inventory and belief seeds) handed to newly minted traders.

use super::history::MarketHistory;
use crate::types::*;
use rand::Rng;
use std::collections::HashMap;

/// Inventory space of a freshly created trader
pub const STARTING_CAPACITY: f64 = 500.0;
/// Cash of a freshly created trader
pub const STARTING_CASH: Cash = 100.0;
/// Cash charged per tick when no recipe can run
pub const IDLE_TAX: Cash = 20.0;
/// Target stock of recipe inputs a trader tries to hold
const INPUT_IDEAL: Quantity = 3;

/// The canonical commodity table with listing seed prices. The engine
/// accepts any commodity set; these are the defaults the stock roles
/// produce and consume.
pub fn default_commodities() -> Vec<(Commodity, Price)> {
    vec![
        (Commodity::new("food", 0.5, 3010), 10.0),
        (Commodity::new("wood", 1.0, 3011), 3.0),
        (Commodity::new("fertilizer", 0.1, 3012), 11.0),
        (Commodity::new("ore", 1.0, 3013), 1.0),
        (Commodity::new("metal", 1.0, 3014), 2.0),
        (Commodity::new("tools", 1.0, 3015), 5.0),
    ]
}

/// Which role produces a commodity
pub fn producer_of(commodity: &str) -> Role {
    match commodity {
        "food" => Role::Farmer,
        "fertilizer" => Role::Composter,
        "wood" => Role::Woodcutter,
        "ore" => Role::Miner,
        "metal" => Role::Refiner,
        "tools" => Role::Blacksmith,
        _ => Role::None,
    }
}

/// Pick a producer role biased toward undersupplied commodities: the
/// weight of a commodity's producer is `exp(gamma * avg net supply)`,
/// so shortages (negative net supply) with negative gamma grow weights
/// above 1.
pub fn choose_role_weighted<R: Rng>(
    history: &MarketHistory,
    commodities: &HashMap<String, Commodity>,
    gamma: f64,
    lookback_ms: i64,
    now_ms: i64,
    rng: &mut R,
) -> Role {
    let weights: Vec<(Role, f64)> = commodities
        .keys()
        .map(|name| {
            let supply = history.net_supply.t_average(name, lookback_ms, now_ms);
            (producer_of(name), (gamma * supply).exp())
        })
        .collect();
    weighted_choice(&weights, rng)
}

fn weighted_choice<R: Rng>(weights: &[(Role, f64)], rng: &mut R) -> Role {
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Role::None;
    }
    let mut remainder = rng.random_range(0.0..total);
    for (role, weight) in weights {
        if remainder < *weight {
            return *role;
        }
        remainder -= weight;
    }
    Role::None
}

/// Everything needed to stamp out a trader entity of a given role
#[derive(Debug, Clone)]
pub struct RoleBlueprint {
    pub role: Role,
    pub buildings: TraderBuildings,
    pub starting_inventory: TraderInventory,
    /// Commodities the trader forms beliefs about: (name, ideal, seed cost)
    pub belief_seeds: Vec<(String, Quantity, Price)>,
}

/// Build the blueprint for a role against the registered commodity table
/// and its seed prices. Returns `None` for `Role::None`.
pub fn blueprint_for(
    role: Role,
    commodities: &HashMap<String, Commodity>,
    seed_prices: &HashMap<String, Price>,
) -> Option<RoleBlueprint> {
    let definition = match role {
        Role::Farmer => RoleDefinition {
            buildings: vec![
                // 1 fertilizer + 1 tool (10% break chance) + 1 wood = 6 food
                recipe("farm1", 1, &[("food", 6, 1.0)], &[("fertilizer", 1, 1.0), ("tools", 1, 0.1), ("wood", 1, 1.0)], false),
                // 1 fertilizer + 1 wood = 3 food
                recipe("farm2", 2, &[("food", 3, 1.0)], &[("fertilizer", 1, 1.0), ("wood", 1, 1.0)], false),
                // 1 fertilizer = 1 food
                recipe("farm3", 3, &[("food", 1, 1.0)], &[("fertilizer", 1, 1.0)], false),
            ],
            stock: vec![("food", 0), ("tools", 1), ("wood", 1), ("fertilizer", 1)],
            inputs: vec!["fertilizer", "tools", "wood"],
            output: "food",
        },
        Role::Woodcutter => RoleDefinition {
            buildings: vec![
                // 1 food + 1 tool (10% break chance) = 2 wood
                recipe("lumberyard1", 1, &[("wood", 2, 1.0)], &[("tools", 1, 0.1), ("food", 1, 1.0)], false),
                // 1 food = 1 wood
                recipe("lumberyard2", 2, &[("wood", 1, 1.0)], &[("food", 1, 1.0)], false),
            ],
            stock: vec![("food", 1), ("tools", 1), ("wood", 0)],
            inputs: vec!["food", "tools"],
            output: "wood",
        },
        Role::Composter => RoleDefinition {
            buildings: vec![
                // 1 food = 1 fertilizer (50% success chance)
                recipe("composter1", 1, &[("fertilizer", 1, 0.5)], &[("food", 1, 1.0)], false),
            ],
            stock: vec![("food", 1), ("fertilizer", 0)],
            inputs: vec!["food"],
            output: "fertilizer",
        },
        Role::Miner => RoleDefinition {
            buildings: vec![
                // 1 food + 1 tool (10% break chance) = 4 ore
                recipe("mine1", 1, &[("ore", 4, 1.0)], &[("food", 1, 1.0), ("tools", 1, 0.1)], false),
                // 1 food = 2 ore
                recipe("mine2", 2, &[("ore", 2, 1.0)], &[("food", 1, 1.0)], false),
            ],
            stock: vec![("food", 1), ("tools", 1), ("ore", 0)],
            inputs: vec!["food", "tools"],
            output: "ore",
        },
        Role::Refiner => RoleDefinition {
            buildings: vec![
                // 1 food + 1 ore + 1 tool (10% break chance) = 1 metal
                recipe("smelter1", 1, &[("metal", 1, 1.0)], &[("food", 1, 1.0), ("ore", 1, 1.0), ("tools", 1, 0.1)], true),
                // 1 food + 2 ore = 2 metal
                recipe("smelter2", 2, &[("metal", 2, 1.0)], &[("food", 1, 1.0), ("ore", 2, 1.0)], false),
                // 1 food + 1 ore = 1 metal
                recipe("smelter3", 3, &[("metal", 1, 1.0)], &[("food", 1, 1.0), ("ore", 1, 1.0)], false),
            ],
            stock: vec![("food", 1), ("tools", 1), ("ore", 1), ("metal", 0)],
            inputs: vec!["food", "ore", "tools"],
            output: "metal",
        },
        Role::Blacksmith => RoleDefinition {
            buildings: vec![
                // 1 food + 1 metal = 1 tools
                recipe("forge1", 1, &[("tools", 1, 1.0)], &[("food", 1, 1.0), ("metal", 1, 1.0)], true),
            ],
            stock: vec![("food", 1), ("tools", 0), ("metal", 1)],
            inputs: vec!["food", "metal"],
            output: "tools",
        },
        Role::None => return None,
    };

    let mut starting_inventory = TraderInventory::new(STARTING_CAPACITY, STARTING_CASH);
    for (name, quantity) in &definition.stock {
        let unit_size = commodities.get(*name).map(|c| c.unit_size).unwrap_or(1.0);
        starting_inventory.items.insert(
            name.to_string(),
            InventoryItem {
                unit_size,
                quantity: *quantity,
            },
        );
    }

    let seed_cost = |name: &str| seed_prices.get(name).copied().unwrap_or(0.0);
    let mut belief_seeds: Vec<(String, Quantity, Price)> = definition
        .inputs
        .iter()
        .map(|name| (name.to_string(), INPUT_IDEAL, seed_cost(name)))
        .collect();
    belief_seeds.push((definition.output.to_string(), 0, seed_cost(definition.output)));

    Some(RoleBlueprint {
        role,
        buildings: TraderBuildings {
            buildings: definition.buildings,
            idle_tax: IDLE_TAX,
        },
        starting_inventory,
        belief_seeds,
    })
}

struct RoleDefinition {
    buildings: Vec<Building>,
    stock: Vec<(&'static str, Quantity)>,
    inputs: Vec<&'static str>,
    output: &'static str,
}

fn recipe(
    name: &str,
    priority: i32,
    produces: &[(&str, Quantity, f64)],
    requires: &[(&str, Quantity, f64)],
    repeatable: bool,
) -> Building {
    Building {
        produces: produces
            .iter()
            .map(|(c, q, chance)| RecipeEntry::new(c, *q, *chance))
            .collect(),
        requires: requires
            .iter()
            .map(|(c, q, chance)| RecipeEntry::new(c, *q, *chance))
            .collect(),
        priority,
        name: name.to_string(),
        repeatable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn commodity_map() -> (HashMap<String, Commodity>, HashMap<String, Price>) {
        let mut commodities = HashMap::new();
        let mut prices = HashMap::new();
        for (commodity, seed_price) in default_commodities() {
            prices.insert(commodity.name.clone(), seed_price);
            commodities.insert(commodity.name.clone(), commodity);
        }
        (commodities, prices)
    }

    #[test]
    fn test_producer_mapping() {
        assert_eq!(producer_of("food"), Role::Farmer);
        assert_eq!(producer_of("tools"), Role::Blacksmith);
        assert_eq!(producer_of("unobtainium"), Role::None);
    }

    #[test]
    fn test_weighted_choice_empty_is_none() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(weighted_choice(&[], &mut rng), Role::None);
    }

    #[test]
    fn test_blueprints_reference_known_commodities() {
        let (commodities, prices) = commodity_map();
        for role in [
            Role::Farmer,
            Role::Woodcutter,
            Role::Composter,
            Role::Miner,
            Role::Refiner,
            Role::Blacksmith,
        ] {
            let blueprint = blueprint_for(role, &commodities, &prices).unwrap();
            assert!(!blueprint.buildings.buildings.is_empty());
            for building in &blueprint.buildings.buildings {
                for entry in building.produces.iter().chain(building.requires.iter()) {
                    assert!(commodities.contains_key(&entry.commodity), "{}", entry.commodity);
                }
            }
            // a trader always believes in its own output
            let output = blueprint
                .belief_seeds
                .iter()
                .find(|(name, _, _)| producer_of(name) == role);
            assert!(output.is_some());
            assert_eq!(blueprint.starting_inventory.cash, STARTING_CASH);
        }
        assert!(blueprint_for(Role::None, &commodities, &prices).is_none());
    }

    #[test]
    fn test_role_weighting_biases_toward_shortage() {
        let mut history = MarketHistory::new();
        let mut commodities = HashMap::new();
        for (name, net_supply) in [("food", -10.0), ("wood", 0.0), ("ore", 10.0)] {
            history.initialise(name);
            history.net_supply.add(name, net_supply, 1_000);
            commodities.insert(name.to_string(), Commodity::new(name, 1.0, 0));
        }

        let gamma = -0.02;
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<Role, u32> = HashMap::new();
        for _ in 0..10_000 {
            let role = choose_role_weighted(&history, &commodities, gamma, 2_000, 1_000, &mut rng);
            *counts.entry(role).or_insert(0) += 1;
        }

        let farmers = counts.get(&Role::Farmer).copied().unwrap_or(0) as f64;
        let miners = counts.get(&Role::Miner).copied().unwrap_or(0) as f64;
        assert!(farmers > 0.0 && miners > 0.0);
        // expected ratio is e^{0.2} / e^{-0.2} = e^{0.4}
        let ratio = farmers / miners;
        let expected = (0.4f64).exp();
        assert!(
            (ratio - expected).abs() < 0.25,
            "ratio {} vs expected {}",
            ratio,
            expected
        );
    }
}
