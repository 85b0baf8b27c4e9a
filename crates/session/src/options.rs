use webnn_ep_backend::{ContextOptions, DevicePreference, PowerPreference};

use crate::ConfigError;

/// Legacy device flag values.
pub const DEVICE_FLAG_NONE: u32 = 0;
pub const DEVICE_FLAG_USE_GPU: u32 = 1;
pub const DEVICE_FLAG_USE_CPU: u32 = 2;

/// Legacy power flag values.
pub const POWER_FLAG_NONE: u32 = 0;
pub const POWER_FLAG_USE_HIGH_PERFORMANCE: u32 = 1;
pub const POWER_FLAG_USE_LOW_POWER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    device_preference: DevicePreference,
    power_preference: PowerPreference,
    dynamic_dims_as_one: bool,
}

impl ProviderOptions {
    pub const fn new() -> Self {
        Self {
            device_preference: DevicePreference::Default,
            power_preference: PowerPreference::Default,
            dynamic_dims_as_one: false,
        }
    }

    pub const fn with_device_preference(mut self, device_preference: DevicePreference) -> Self {
        self.device_preference = device_preference;
        self
    }

    pub const fn with_power_preference(mut self, power_preference: PowerPreference) -> Self {
        self.power_preference = power_preference;
        self
    }

    /// Substitute 1 for dynamic input and output dimensions instead of
    /// rejecting the subgraph.
    pub const fn with_dynamic_dims_as_one(mut self, dynamic_dims_as_one: bool) -> Self {
        self.dynamic_dims_as_one = dynamic_dims_as_one;
        self
    }

    /// Converts the flag pair of the C factory interface. Each flag selects
    /// exactly one preference; combined bits are rejected.
    pub fn from_flags(device_flags: u32, power_flags: u32) -> Result<Self, ConfigError> {
        let device_preference = match device_flags {
            DEVICE_FLAG_NONE => DevicePreference::Default,
            DEVICE_FLAG_USE_GPU => DevicePreference::Gpu,
            DEVICE_FLAG_USE_CPU => DevicePreference::Cpu,
            flags => return Err(ConfigError::DeviceFlags(flags)),
        };
        let power_preference = match power_flags {
            POWER_FLAG_NONE => PowerPreference::Default,
            POWER_FLAG_USE_HIGH_PERFORMANCE => PowerPreference::HighPerformance,
            POWER_FLAG_USE_LOW_POWER => PowerPreference::LowPower,
            flags => return Err(ConfigError::PowerFlags(flags)),
        };
        Ok(Self::new()
            .with_device_preference(device_preference)
            .with_power_preference(power_preference))
    }

    pub fn device_preference(&self) -> DevicePreference {
        self.device_preference
    }

    pub fn power_preference(&self) -> PowerPreference {
        self.power_preference
    }

    pub fn dynamic_dims_as_one(&self) -> bool {
        self.dynamic_dims_as_one
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            device_preference: self.device_preference,
            power_preference: self.power_preference,
        }
    }
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn flags_map_to_preferences() {
    let opts = ProviderOptions::from_flags(DEVICE_FLAG_USE_GPU, POWER_FLAG_USE_LOW_POWER).unwrap();
    assert_eq!(opts.device_preference(), DevicePreference::Gpu);
    assert_eq!(opts.power_preference(), PowerPreference::LowPower);
    assert!(!opts.dynamic_dims_as_one());

    let opts = ProviderOptions::from_flags(DEVICE_FLAG_USE_CPU, POWER_FLAG_NONE).unwrap();
    assert_eq!(
        opts.context_options(),
        ContextOptions {
            device_preference: DevicePreference::Cpu,
            power_preference: PowerPreference::Default,
        }
    );
}

#[test]
fn combined_flags_are_rejected() {
    assert_eq!(
        ProviderOptions::from_flags(DEVICE_FLAG_USE_GPU | DEVICE_FLAG_USE_CPU, 0),
        Err(ConfigError::DeviceFlags(3))
    );
    assert_eq!(
        ProviderOptions::from_flags(0, 4),
        Err(ConfigError::PowerFlags(4))
    );
}
