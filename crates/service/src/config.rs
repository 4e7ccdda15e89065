//! Emulator configuration.
//!
//! Lives at `/etc/wheel-emulator.toml` by default. A missing file is
//! replaced by a commented template so users have something to edit; out
//! of range values are clamped rather than rejected.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default config location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/wheel-emulator.toml";

const DEFAULT_SENSITIVITY: i32 = 50;
const DEFAULT_FFB_GAIN: f32 = 0.3;

const DEFAULT_TEMPLATE: &str = r#"# Wheel emulator configuration.
#
# Keyboard and mouse are auto-detected while running. Uncomment the paths
# below to pin specific devices instead.
#
# Controls: steering = mouse X, throttle = W, brake = S, clutch = A,
# D-pad = arrow keys, wheel buttons = Q..P, 1..0, Shift, Space, Tab, Enter.
# Toggle emulation with Ctrl+M.
#
# The host sees a Logitech G29 Driving Force Racing Wheel. Note that a real
# G29 reports inverted pedals (rest = max); games expecting that convention
# need no extra settings.

[devices]
# keyboard = "/dev/input/event6"
# mouse = "/dev/input/event11"

[steering]
# Mouse counts to steering units multiplier, 1-100.
sensitivity = 50

[ffb]
# Overall force feedback strength, 0.1-4.0.
gain = 0.3
"#;

/// Device path overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub keyboard: Option<PathBuf>,
    pub mouse: Option<PathBuf>,
}

/// Steering feel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    pub sensitivity: i32,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
        }
    }
}

/// Force feedback tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfbConfig {
    pub gain: f32,
}

impl Default for FfbConfig {
    fn default() -> Self {
        Self {
            gain: DEFAULT_FFB_GAIN,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub devices: DevicesConfig,
    pub steering: SteeringConfig,
    pub ffb: FfbConfig,
}

impl EmulatorConfig {
    /// Load the config, generating the default template when absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let mut config: EmulatorConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            config.clamp();
            info!(path = %path.display(), "loaded configuration");
            Ok(config)
        } else {
            if let Err(e) = fs::write(path, DEFAULT_TEMPLATE) {
                // Not fatal: running from a sandbox or without /etc access
                // still works with defaults.
                info!(path = %path.display(), error = %e, "could not write default config");
            } else {
                info!(path = %path.display(), "wrote default configuration");
            }
            Ok(Self::default())
        }
    }

    /// Treat empty override strings like absent ones.
    pub fn keyboard_override(&self) -> Option<&Path> {
        self.devices
            .keyboard
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    /// See [`EmulatorConfig::keyboard_override`].
    pub fn mouse_override(&self) -> Option<&Path> {
        self.devices
            .mouse
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }

    fn clamp(&mut self) {
        self.steering.sensitivity = self.steering.sensitivity.clamp(1, 100);
        self.ffb.gain = self.ffb.gain.clamp(0.1, 4.0);
    }
}
