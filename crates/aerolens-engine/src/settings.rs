//! Display and HMD settings.
//!
//! A `SettingsStore` is shared by the application and every render pipeline.
//! Pipelines read it once per configuration, when the distortion corrector
//! is built, and hand the resulting `LensParams` to the backend explicitly.

use std::sync::{PoisonError, RwLock};

/// Physical properties of the device screen.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DisplaySettings {
    /// Horizontal pixel density, dots per inch.
    pub xdpi: f32,
    /// Vertical pixel density, dots per inch.
    pub ydpi: f32,
    /// Distance from the bottom screen edge to the HMD frame, millimetres.
    pub device_margin_mm: f32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            xdpi: 200.0,
            ydpi: 200.0,
            device_margin_mm: 4.0,
        }
    }
}

/// Head-mounted display lens model.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum HmdModel {
    /// No distortion, lens centered in each eye.
    #[default]
    Unknown,
    /// Phone-in-goggles viewer with strong barrel lenses.
    Cockpitglasses,
}

/// User-tunable HMD correction parameters.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct HmdSettings {
    pub model: HmdModel,
    /// Interpupillary distance, millimetres.
    pub ipd_mm: f32,
    /// Zoom applied after distortion (1.0 = none).
    pub scale: f32,
    /// Horizontal pan, fraction of eye width.
    pub pan_h: f32,
    /// Vertical pan, fraction of eye height.
    pub pan_v: f32,
}

impl Default for HmdSettings {
    fn default() -> Self {
        Self {
            model: HmdModel::Unknown,
            ipd_mm: 63.0,
            scale: 1.0,
            pan_h: 0.0,
            pan_v: 0.0,
        }
    }
}

/// Everything the distortion corrector needs, snapshotted at configure time.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct LensParams {
    pub display: DisplaySettings,
    pub hmd: HmdSettings,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub display: DisplaySettings,
    pub hmd: HmdSettings,
}

/// Process-wide settings behind a read/write lock.
#[derive(Debug, Default)]
pub struct SettingsStore {
    inner: RwLock<Settings>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Applies `f` under the write lock.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Reads display and HMD parameters in one critical section.
    pub fn lens_params(&self) -> LensParams {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        LensParams {
            display: guard.display,
            hmd: guard.hmd,
        }
    }
}
