//! Device unit registry
//!
//! Binds radio devices to unit numbers and interrupt lines, so interrupt
//! handlers can find the MAC instance an interrupt belongs to.
//
// https://github.com/rust-iot/rust-lpwan
// Copyright 2021 Ryan Kurte

use crate::error::UnitError;

/// Registry of up to `U` devices indexed by unit number
pub struct Units<'a, D: ?Sized, const U: usize> {
    units: [Option<(u32, &'a D)>; U],
}

impl <'a, D: ?Sized, const U: usize> Units<'a, D, U> {
    pub const fn new() -> Self {
        Self { units: [None; U] }
    }

    /// Bind a device to a unit and its interrupt number
    pub fn register(&mut self, unit: usize, irq: u32, device: &'a D) -> Result<(), UnitError> {
        match self.units.get(unit) {
            None => return Err(UnitError::NoSuchUnit(unit)),
            Some(Some(_)) => return Err(UnitError::InUse(unit)),
            Some(None) => (),
        }

        if self.units.iter().flatten().any(|(i, _)| *i == irq) {
            return Err(UnitError::InterruptInUse(irq));
        }

        self.units[unit] = Some((irq, device));

        Ok(())
    }

    /// Remove a unit binding, returning the device
    pub fn unregister(&mut self, unit: usize) -> Option<&'a D> {
        self.units.get_mut(unit)?.take().map(|(_, d)| d)
    }

    pub fn get(&self, unit: usize) -> Option<&'a D> {
        self.units.get(unit).copied().flatten().map(|(_, d)| d)
    }

    /// Find the unit and device bound to an interrupt
    pub fn by_interrupt(&self, irq: u32) -> Option<(usize, &'a D)> {
        self.units.iter().enumerate()
            .find_map(|(n, u)| match u {
                Some((i, d)) if *i == irq => Some((n, *d)),
                _ => None,
            })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let radios = ["radio0", "radio1"];
        let mut units = Units::<str, 2>::new();

        units.register(0, 26, radios[0]).unwrap();
        units.register(1, 27, radios[1]).unwrap();

        assert_eq!(units.get(1), Some("radio1"));
        assert_eq!(units.by_interrupt(26), Some((0, "radio0")));
        assert_eq!(units.by_interrupt(99), None);
    }

    #[test]
    fn register_errors() {
        let mut units = Units::<u8, 2>::new();
        let (a, b) = (1u8, 2u8);

        units.register(0, 10, &a).unwrap();

        assert_eq!(units.register(2, 11, &b), Err(UnitError::NoSuchUnit(2)));
        assert_eq!(units.register(0, 11, &b), Err(UnitError::InUse(0)));
        assert_eq!(units.register(1, 10, &b), Err(UnitError::InterruptInUse(10)));

        assert_eq!(units.unregister(0), Some(&a));
        assert_eq!(units.unregister(0), None);
        units.register(1, 10, &b).unwrap();
        assert_eq!(units.by_interrupt(10), Some((1, &b)));
    }
}
