//! Static configuration of the pool sensor kit.
//!
//! Addresses are the factory defaults of the EZO pH, ORP and RTD circuits.

use core::ops::Add;
use core::time::Duration;

use crate::ezo::{CompensationRoles, DEFAULT_COMPENSATION_C, PeripheralConfig};
use crate::registry::{PeripheralRegistry, RegistryError};
use crate::sequencer::DEFAULT_POLL_INTERVAL;

pub const PH_NAME: &str = "PH";
pub const ORP_NAME: &str = "ORP";
pub const RTD_NAME: &str = "RTD";

pub const PH_ADDRESS: u8 = 99;
pub const ORP_ADDRESS: u8 = 98;
pub const RTD_ADDRESS: u8 = 102;

/// Number of peripherals on the kit.
pub const KIT_SIZE: usize = 3;

/// Peripherals of the pool kit, in registry order.
pub const KIT_PERIPHERALS: [PeripheralConfig; KIT_SIZE] = [
    PeripheralConfig::new(PH_NAME, PH_ADDRESS),
    PeripheralConfig::new(ORP_NAME, ORP_ADDRESS),
    PeripheralConfig::new(RTD_NAME, RTD_ADDRESS),
];

/// Timing of the unattended poll cycle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PollTiming {
    /// Time between the start of two passes.
    pub interval: Duration,
    /// Compensation temperature used when the RTD reading is unusable.
    pub default_compensation: f32,
}

impl PollTiming {
    pub const fn new() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            default_compensation: DEFAULT_COMPENSATION_C,
        }
    }
}

impl Default for PollTiming {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything needed to bring up a station.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StationConfig<const N: usize> {
    pub peripherals: [PeripheralConfig; N],
    /// Peripheral whose reading is temperature compensated.
    pub primary: &'static str,
    /// Peripheral supplying the compensation temperature.
    pub secondary: &'static str,
    /// Peripheral receiving commands that name no device.
    pub default_device: Option<&'static str>,
    pub poll: PollTiming,
}

impl StationConfig<KIT_SIZE> {
    /// Pool kit wiring: pH compensated by RTD, no default device.
    pub const fn pool_kit() -> Self {
        Self {
            peripherals: KIT_PERIPHERALS,
            primary: PH_NAME,
            secondary: RTD_NAME,
            default_device: None,
            poll: PollTiming::new(),
        }
    }
}

impl Default for StationConfig<KIT_SIZE> {
    fn default() -> Self {
        Self::pool_kit()
    }
}

impl<const N: usize> StationConfig<N> {
    /// Builds the registry described by this configuration.
    ///
    /// # Errors
    ///
    /// Propagates duplicate names and an unknown default device.
    pub fn registry<TInstant>(&self) -> Result<PeripheralRegistry<TInstant, N>, RegistryError>
    where
        TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
    {
        let registry = PeripheralRegistry::new(self.peripherals)?;
        match self.default_device {
            Some(name) => registry.with_default(name),
            None => Ok(registry),
        }
    }

    /// Resolves the compensation roles against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] when either role is not configured.
    pub fn roles<TInstant>(
        &self,
        registry: &PeripheralRegistry<TInstant, N>,
    ) -> Result<CompensationRoles, RegistryError>
    where
        TInstant: Copy + Ord + Add<Duration, Output = TInstant>,
    {
        Ok(CompensationRoles {
            primary: registry
                .index_of(self.primary)
                .ok_or(RegistryError::NotFound)?,
            secondary: registry
                .index_of(self.secondary)
                .ok_or(RegistryError::NotFound)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ezo::test_support::MockInstant;

    #[test]
    fn pool_kit_wires_ph_and_rtd() {
        let config = StationConfig::default();
        let registry = config.registry::<MockInstant>().expect("registry");
        let roles = config.roles(&registry).expect("roles");

        assert_eq!(roles, CompensationRoles { primary: 0, secondary: 2 });
        assert_eq!(registry.default_index(), None);
        assert_eq!(registry.get(2).map(|rtd| rtd.address()), Some(RTD_ADDRESS));
    }

    #[test]
    fn default_device_must_exist() {
        let config = StationConfig {
            default_device: Some("EC"),
            ..StationConfig::pool_kit()
        };
        assert!(matches!(
            config.registry::<MockInstant>(),
            Err(RegistryError::UnknownDefault)
        ));
    }
}
