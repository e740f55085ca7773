//! Weir Runtime
//!
//! Minimal binary that boots a world and runs a structural churn
//! simulation: units spawn into a staging group, deploy to the active
//! group, take damage, and leave wrecks behind when they fall.

mod settings;

use anyhow::Result;
use settings::Settings;
use std::path::Path;
use std::time::Instant;
use weir_core::{
    Component, DeferredOps, EntityEvent, EntityId, EntityKey, EntityReactor, EventMask, GroupId,
    TickDriver, TickObserver, World,
};
use weir_metrics::RingBuffer;

const STAGING: GroupId = GroupId(1);
const ACTIVE: GroupId = GroupId(2);
const WRECKS: GroupId = GroupId(3);

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Position {
    x: f32,
    y: f32,
}
impl Component for Position {}

#[derive(Debug, Clone)]
struct Health {
    hp: i32,
}
impl Component for Health {}

#[derive(Debug, Clone)]
struct Callsign(String);
impl Component for Callsign {}

/// Logs deployments into the active group.
struct DeploymentLog;

impl EntityReactor<Health> for DeploymentLog {
    fn react(&mut self, event: EntityEvent<'_, Health>, _ops: &mut DeferredOps<'_>) -> Result<()> {
        if let EntityEvent::Swapped { value, from, to } = event {
            tracing::debug!(%from, %to, hp = value.hp, "unit deployed");
        }
        Ok(())
    }
}

/// Every unit that falls in the field leaves a wreck at its last position.
struct WreckSpawner;

impl EntityReactor<Position> for WreckSpawner {
    fn react(&mut self, event: EntityEvent<'_, Position>, ops: &mut DeferredOps<'_>) -> Result<()> {
        if let EntityEvent::Removed { value, key } = event {
            if key.group == ACTIVE {
                ops.build_entity(key.with_group(WRECKS), (*value,))?;
            }
        }
        Ok(())
    }
}

struct TickLog;

impl TickObserver for TickLog {
    fn submission_completed(&mut self, tick: u64) {
        tracing::trace!(tick, "submission completed");
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Weir v{}", weir_core::VERSION);
    let settings = Settings::load(Path::new("weir.json"))?;
    tracing::info!(?settings, "settings loaded");

    let mut world = World::new();
    world.register_raw_component::<Position>()?;
    world.register_component::<Health>()?;
    world.register_component::<Callsign>()?;

    world.subscribe::<Health>(EventMask::SWAP, DeploymentLog)?;
    world.subscribe::<Position>(EventMask::REMOVE, WreckSpawner)?;
    world.observe(TickLog);

    let mut driver = TickDriver::new();
    let mut timings = RingBuffer::new(60);
    let mut next_id: u32 = 1;

    let sim = &settings.simulation;
    for tick in 0..sim.ticks {
        // fresh recruits muster in staging; last tick's muster deploys
        for _ in 0..sim.spawn_per_tick {
            let id = next_id;
            next_id += 1;
            world.build_entity(
                EntityKey::new(EntityId(id), STAGING),
                (
                    Position {
                        x: id as f32,
                        y: 0.0,
                    },
                    Health {
                        hp: sim.starting_hp,
                    },
                    Callsign(format!("unit-{id}")),
                ),
            )?;
        }
        world.queue_group_swap(STAGING, ACTIVE)?;

        // attrition on the field
        if let Some(units) = world.store_mut::<Health>(ACTIVE) {
            for unit in units.values_mut() {
                unit.hp -= sim.damage_per_tick;
            }
        }
        let fallen: Vec<EntityId> = world
            .store::<Health>(ACTIVE)
            .map(|units| {
                units
                    .iter()
                    .filter(|(_, unit)| unit.hp <= 0)
                    .map(|(id, _)| id)
                    .collect()
            })
            .unwrap_or_default();
        for id in fallen {
            world.queue_remove(EntityKey::new(id, ACTIVE))?;
        }

        if sim.wreck_sweep_interval > 0 && (tick + 1) % sim.wreck_sweep_interval == 0 {
            world.queue_group_remove(WRECKS)?;
        }

        let started = Instant::now();
        driver.step(&mut world)?;
        timings.push(started.elapsed());
    }

    tracing::info!(
        ticks = driver.ticks(),
        live_units = world.store::<Health>(ACTIVE).map_or(0, |units| units.len()),
        wrecks = world.store::<Position>(WRECKS).map_or(0, |w| w.len()),
        "simulation finished"
    );
    if let Some(roster) = world.store::<Callsign>(ACTIVE) {
        if let Some((id, callsign)) = roster.iter().next() {
            let position = world
                .store::<Position>(ACTIVE)
                .and_then(|store| store.get(id).ok());
            if let Some(at) = position {
                tracing::debug!(
                    %id,
                    name = callsign.0.as_str(),
                    x = at.x,
                    y = at.y,
                    "senior surviving unit"
                );
            }
        }
    }

    weir_metrics::metrics! {
        tracing::info!(average = ?timings.average(), "tick timing");
        for (name, value) in world.counters().snapshot() {
            tracing::info!(counter = name.as_str(), value, "storage counter");
        }
    }

    world.dispose()?;
    Ok(())
}
