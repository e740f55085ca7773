//! Tick driver
//!
//! Owns the external tick cadence: one `step` is one submission. The driver
//! binds to the first world it steps and refuses any other, so two worlds
//! cannot share a tick counter by accident. Pausing stops both the counter
//! and the submissions.

use crate::error::{SubmitError, UsageError};
use crate::world::World;

pub struct TickDriver {
    ticks: u64,
    paused: bool,
    bound: Option<u64>,
}

impl TickDriver {
    pub fn new() -> Self {
        Self {
            ticks: 0,
            paused: false,
            bound: None,
        }
    }

    /// Completed ticks since creation.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Run one submission tick against `world`. A paused driver does
    /// nothing; queued work stays queued and the tick counter holds.
    pub fn step(&mut self, world: &mut World) -> Result<(), SubmitError> {
        match self.bound {
            None => self.bound = Some(world.id()),
            Some(bound) if bound != world.id() => {
                return Err(SubmitError::Usage(UsageError::DriverRebound {
                    bound,
                    given: world.id(),
                }));
            }
            Some(_) => {}
        }

        if self.paused {
            return Ok(());
        }

        world.submit()?;
        self.ticks += 1;
        Ok(())
    }
}

impl Default for TickDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_driver_holds_the_counter() {
        let mut driver = TickDriver::new();
        let mut world = World::new();

        driver.step(&mut world).unwrap();
        assert_eq!(driver.ticks(), 1);

        driver.pause();
        driver.step(&mut world).unwrap();
        assert_eq!(driver.ticks(), 1);

        driver.resume();
        driver.step(&mut world).unwrap();
        assert_eq!(driver.ticks(), 2);
    }

    #[test]
    fn driver_binds_to_its_first_world() {
        let mut driver = TickDriver::new();
        let mut first = World::new();
        let mut second = World::new();

        driver.step(&mut first).unwrap();
        assert!(matches!(
            driver.step(&mut second),
            Err(SubmitError::Usage(UsageError::DriverRebound { .. }))
        ));
        driver.step(&mut first).unwrap();
    }
}
