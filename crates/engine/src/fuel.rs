//! Step budgets for the engine's potentially expensive computations.
//!
//! Every analysis that walks a program in a way that could be driven to
//! unbounded work by adversarial input draws from a [`Fuel`] tank, and stops
//! with an error once it is empty.

/// A step budget.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Fuel {
    budget:    u64,
    remaining: u64,
}

/// The error returned when a [`Fuel`] tank runs dry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutOfFuel {
    /// The budget that the tank started with.
    pub budget: u64,
}

impl Fuel {
    /// Creates a tank holding `budget` steps.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            remaining: budget,
        }
    }

    /// Consumes `steps` from the tank.
    ///
    /// # Errors
    ///
    /// - [`OutOfFuel`] if fewer than `steps` remain. The tank is left empty.
    pub fn consume(&mut self, steps: u64) -> Result<(), OutOfFuel> {
        if self.remaining < steps {
            self.remaining = 0;
            return Err(OutOfFuel {
                budget: self.budget,
            });
        }
        self.remaining -= steps;
        Ok(())
    }

    /// Consumes a single step from the tank.
    ///
    /// # Errors
    ///
    /// - [`OutOfFuel`] if the tank is empty.
    pub fn tick(&mut self) -> Result<(), OutOfFuel> {
        self.consume(1)
    }

    /// The budget the tank started with.
    #[must_use]
    pub fn budget(&self) -> u64 {
        self.budget
    }

    /// The number of steps used so far.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.budget - self.remaining
    }

    /// Checks if the tank is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }
}

#[cfg(test)]
mod test {
    use crate::fuel::{Fuel, OutOfFuel};

    #[test]
    fn runs_dry_after_budget() {
        let mut fuel = Fuel::new(3);
        assert!(fuel.tick().is_ok());
        assert!(fuel.consume(2).is_ok());
        assert_eq!(fuel.used(), 3);
        assert_eq!(fuel.tick(), Err(OutOfFuel { budget: 3 }));
        assert!(fuel.is_empty());
    }
}
