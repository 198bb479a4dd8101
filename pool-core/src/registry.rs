//! Fixed set of peripherals shared by the polling and request paths.

use core::fmt;
use core::ops::Add;
use core::time::Duration;

use crate::ezo::{CommandTarget, Peripheral, PeripheralConfig};

/// Errors raised while building or querying a [`PeripheralRegistry`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegistryError {
    /// Two configuration entries share a name (compared without case).
    DuplicateName { name: &'static str },
    /// The requested default peripheral is not configured.
    UnknownDefault,
    /// No peripheral carries the requested name.
    NotFound,
    /// A command without a target arrived and no default is configured.
    NoDefault,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateName { name } => write!(f, "duplicate peripheral name {name}"),
            RegistryError::UnknownDefault => write!(f, "default peripheral is not configured"),
            RegistryError::NotFound => write!(f, "device not found"),
            RegistryError::NoDefault => write!(f, "no target and no default device"),
        }
    }
}

/// Ordered peripherals addressable by position and by name.
#[derive(Clone, Debug)]
pub struct PeripheralRegistry<TInstant, const N: usize> {
    peripherals: [Peripheral<TInstant>; N],
    default: Option<usize>,
}

impl<TInstant, const N: usize> PeripheralRegistry<TInstant, N>
where
    TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
{
    /// Builds the registry from static configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] when two entries share a name.
    pub fn new(configs: [PeripheralConfig; N]) -> Result<Self, RegistryError> {
        for (index, config) in configs.iter().enumerate() {
            if configs[..index]
                .iter()
                .any(|earlier| earlier.name.eq_ignore_ascii_case(config.name))
            {
                return Err(RegistryError::DuplicateName { name: config.name });
            }
        }

        Ok(Self {
            peripherals: configs.map(Peripheral::new),
            default: None,
        })
    }

    /// Designates the peripheral that receives commands without a target.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownDefault`] when `name` is not configured.
    pub fn with_default(mut self, name: &str) -> Result<Self, RegistryError> {
        self.default = Some(self.index_of(name).ok_or(RegistryError::UnknownDefault)?);
        Ok(self)
    }

    pub const fn len(&self) -> usize {
        N
    }

    pub const fn is_empty(&self) -> bool {
        N == 0
    }

    /// Position of the default peripheral, if one is configured.
    pub const fn default_index(&self) -> Option<usize> {
        self.default
    }

    /// Position of the peripheral named exactly `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.peripherals
            .iter()
            .position(|peripheral| peripheral.name() == name)
    }

    /// Position of the peripheral whose name matches `name` without regard to ASCII case.
    #[must_use]
    pub fn index_of_ignore_case(&self, name: &str) -> Option<usize> {
        self.peripherals
            .iter()
            .position(|peripheral| peripheral.name().eq_ignore_ascii_case(name))
    }

    /// Resolves a command target to a registry position.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for an unknown name and
    /// [`RegistryError::NoDefault`] for an untargeted command without a default.
    pub fn resolve(&self, target: CommandTarget<'_>) -> Result<usize, RegistryError> {
        match target {
            CommandTarget::Named(name) => self.index_of(name).ok_or(RegistryError::NotFound),
            CommandTarget::Default => self.default.ok_or(RegistryError::NoDefault),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Peripheral<TInstant>> {
        self.peripherals.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Peripheral<TInstant>> {
        self.peripherals.get_mut(index)
    }

    /// Borrows two distinct peripherals mutably at once.
    pub fn pair_mut(
        &mut self,
        first: usize,
        second: usize,
    ) -> Option<(&mut Peripheral<TInstant>, &mut Peripheral<TInstant>)> {
        if first == second || first >= N || second >= N {
            return None;
        }

        if first < second {
            let (head, tail) = self.peripherals.split_at_mut(second);
            Some((&mut head[first], &mut tail[0]))
        } else {
            let (head, tail) = self.peripherals.split_at_mut(first);
            Some((&mut tail[0], &mut head[second]))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peripheral<TInstant>> {
        self.peripherals.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Peripheral<TInstant>> {
        self.peripherals.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ezo::test_support::MockInstant;

    fn kit() -> [PeripheralConfig; 3] {
        [
            PeripheralConfig::new("PH", 99),
            PeripheralConfig::new("ORP", 98),
            PeripheralConfig::new("RTD", 102),
        ]
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let result = PeripheralRegistry::<MockInstant, 2>::new([
            PeripheralConfig::new("PH", 99),
            PeripheralConfig::new("ph", 100),
        ]);
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateName { name: "ph" })
        ));
    }

    #[test]
    fn lookup_by_name_is_exact() {
        let registry = PeripheralRegistry::<MockInstant, 3>::new(kit()).expect("registry");
        assert_eq!(registry.index_of("RTD"), Some(2));
        assert_eq!(registry.index_of("rtd"), None);
        assert_eq!(registry.index_of_ignore_case("rtd"), Some(2));
        assert_eq!(
            registry.resolve(CommandTarget::Named("EC")),
            Err(RegistryError::NotFound)
        );
    }

    #[test]
    fn untargeted_commands_need_a_configured_default() {
        let registry = PeripheralRegistry::<MockInstant, 3>::new(kit()).expect("registry");
        assert_eq!(
            registry.resolve(CommandTarget::Default),
            Err(RegistryError::NoDefault)
        );

        let registry = registry.with_default("PH").expect("default");
        assert_eq!(registry.resolve(CommandTarget::Default), Ok(0));
        assert!(matches!(
            PeripheralRegistry::<MockInstant, 3>::new(kit())
                .expect("registry")
                .with_default("EC"),
            Err(RegistryError::UnknownDefault)
        ));
    }

    #[test]
    fn pair_mut_returns_requested_order() {
        let mut registry = PeripheralRegistry::<MockInstant, 3>::new(kit()).expect("registry");
        let (ph, rtd) = registry.pair_mut(0, 2).expect("pair");
        assert_eq!((ph.name(), rtd.name()), ("PH", "RTD"));
        let (rtd, orp) = registry.pair_mut(2, 1).expect("pair");
        assert_eq!((rtd.name(), orp.name()), ("RTD", "ORP"));
        assert!(registry.pair_mut(1, 1).is_none());
        assert!(registry.pair_mut(0, 3).is_none());
    }
}
