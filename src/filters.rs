//! Audio filter state for a player.
//!
//! [`Filters`] only accumulates parameters; the owning player turns the
//! accumulated state into a single player-update call per change.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A single equalizer band adjustment.
///
/// There are 15 bands (0-14). `gain` is the multiplier for the given band,
/// valid from -0.25 (muted) to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Band {
    /// The band (0 to 14).
    pub band: u8,
    /// The gain (-0.25 to 1.0).
    pub gain: f64,
}

/// Uses equalization to eliminate part of a band, usually targeting vocals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Karaoke {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mono_level: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_band: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_width: Option<f64>,
}

/// Changes the speed, pitch, and rate. All default to 1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timescale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

/// Oscillates the pitch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vibrato {
    /// The frequency 0.0 < x <= 14.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    /// The vibrato depth 0.0 < x <= 1.0.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
}

/// Rotates the sound around the stereo channels, aka audio panning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rotation {
    /// The frequency of the audio rotating around the listener in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_hz: Option<f64>,
}

/// Distortion effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Distortion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sin_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cos_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tan_scale: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

/// Named filter presets tracked by the status bit-set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Preset {
    Bassboost = 0,
    Nightcore = 1,
    Vaporwave = 2,
    Pop = 3,
    Soft = 4,
    TrebleBass = 5,
    Tv = 6,
    EightD = 7,
    Karaoke = 8,
    Vibrato = 9,
    Slowmo = 10,
    Daycore = 11,
    Distortion = 12,
}

impl Preset {
    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

/// Accumulated filter parameters for one player, plus the preset status bits.
///
/// All setters are idempotent and purely local; `payload()` produces the
/// `filters` object for the player-update call.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub volume: Option<f64>,
    pub equalizer: Option<Vec<Band>>,
    pub karaoke: Option<Karaoke>,
    pub timescale: Option<Timescale>,
    pub vibrato: Option<Vibrato>,
    pub rotation: Option<Rotation>,
    pub distortion: Option<Distortion>,
    status: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FiltersPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<f64>,
    /// Always sent, so clearing the equalizer reaches the node as `[]`.
    equalizer: &'a [Band],
    #[serde(skip_serializing_if = "Option::is_none")]
    karaoke: Option<Karaoke>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timescale: Option<Timescale>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vibrato: Option<Vibrato>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rotation: Option<Rotation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distortion: Option<Distortion>,
}

impl Filters {
    /// Sets or clears the filter volume (0.0 to 5.0, 1.0 is 100%).
    pub fn set_volume(&mut self, volume: Option<f64>) {
        self.volume = volume;
    }

    /// Sets or clears the equalizer bands.
    ///
    /// Clearing also drops every equalizer-backed preset flag.
    pub fn set_equalizer(&mut self, bands: Option<Vec<Band>>) -> Result<()> {
        if let Some(bands) = &bands {
            for band in bands {
                if band.band > 14 {
                    return Err(Error::EqualizerBandOutOfRange(band.band));
                }
                if !(-0.25..=1.0).contains(&band.gain) {
                    return Err(Error::EqualizerGainOutOfRange(band.gain));
                }
            }
        }

        if bands.is_none() {
            for preset in [
                Preset::Bassboost,
                Preset::Pop,
                Preset::Soft,
                Preset::TrebleBass,
                Preset::Tv,
            ] {
                self.status &= !preset.bit();
            }
        }

        self.equalizer = bands;
        Ok(())
    }

    /// Sets or clears the karaoke filter.
    pub fn set_karaoke(&mut self, karaoke: Option<Karaoke>) {
        if karaoke.is_none() {
            self.status &= !Preset::Karaoke.bit();
        }
        self.karaoke = karaoke;
    }

    /// Sets or clears the timescale filter.
    pub fn set_timescale(&mut self, timescale: Option<Timescale>) {
        if timescale.is_none() {
            for preset in [
                Preset::Nightcore,
                Preset::Vaporwave,
                Preset::Slowmo,
                Preset::Daycore,
            ] {
                self.status &= !preset.bit();
            }
        }
        self.timescale = timescale;
    }

    /// Sets or clears the vibrato filter.
    pub fn set_vibrato(&mut self, vibrato: Option<Vibrato>) {
        if vibrato.is_none() {
            self.status &= !Preset::Vibrato.bit();
        }
        self.vibrato = vibrato;
    }

    /// Sets or clears the rotation filter.
    pub fn set_rotation(&mut self, rotation: Option<Rotation>) {
        if rotation.is_none() {
            self.status &= !Preset::EightD.bit();
        }
        self.rotation = rotation;
    }

    /// Sets or clears the distortion filter.
    pub fn set_distortion(&mut self, distortion: Option<Distortion>) {
        if distortion.is_none() {
            self.status &= !Preset::Distortion.bit();
        }
        self.distortion = distortion;
    }

    /// Whether a preset is currently applied.
    pub fn is_enabled(&self, preset: Preset) -> bool {
        self.status & preset.bit() != 0
    }

    /// Applies a named preset, writing the underlying field and its flag.
    pub fn apply_preset(&mut self, preset: Preset) {
        match preset {
            Preset::Bassboost => {
                self.equalizer = Some(
                    [0.2, 0.15, 0.1, 0.05, 0.0, -0.05, -0.1]
                        .iter()
                        .enumerate()
                        .map(|(band, gain)| Band {
                            band: band as u8,
                            gain: *gain,
                        })
                        .collect(),
                );
            }
            Preset::Nightcore => {
                self.timescale = Some(Timescale {
                    speed: Some(1.2),
                    pitch: Some(1.2),
                    rate: Some(1.0),
                });
            }
            Preset::Vaporwave => {
                self.timescale = Some(Timescale {
                    speed: Some(0.8),
                    pitch: Some(0.8),
                    rate: Some(1.0),
                });
            }
            Preset::Pop => {
                self.equalizer = Some(
                    [-0.02, -0.01, 0.08, 0.1, 0.15, 0.1, 0.03, -0.02, -0.035]
                        .iter()
                        .enumerate()
                        .map(|(band, gain)| Band {
                            band: band as u8,
                            gain: *gain,
                        })
                        .collect(),
                );
            }
            Preset::Soft => {
                self.equalizer = Some(
                    (8..=14)
                        .map(|band| Band {
                            band,
                            gain: -0.25,
                        })
                        .collect(),
                );
            }
            Preset::TrebleBass => {
                self.equalizer = Some(
                    [
                        (0, 0.6),
                        (1, 0.67),
                        (2, 0.67),
                        (4, -0.2),
                        (5, 0.15),
                        (6, -0.25),
                        (7, 0.23),
                        (8, 0.35),
                        (9, 0.45),
                        (10, 0.55),
                        (11, 0.6),
                        (12, 0.55),
                    ]
                    .iter()
                    .map(|(band, gain)| Band {
                        band: *band,
                        gain: *gain,
                    })
                    .collect(),
                );
            }
            Preset::Tv => {
                self.equalizer = Some(
                    (7..=11)
                        .map(|band| Band { band, gain: 0.65 })
                        .collect(),
                );
            }
            Preset::EightD => {
                self.rotation = Some(Rotation {
                    rotation_hz: Some(0.2),
                });
            }
            Preset::Karaoke => {
                self.karaoke = Some(Karaoke {
                    level: Some(1.0),
                    mono_level: Some(1.0),
                    filter_band: Some(220.0),
                    filter_width: Some(100.0),
                });
            }
            Preset::Vibrato => {
                self.vibrato = Some(Vibrato {
                    frequency: Some(4.0),
                    depth: Some(0.75),
                });
            }
            Preset::Slowmo => {
                self.timescale = Some(Timescale {
                    speed: Some(0.7),
                    pitch: Some(1.0),
                    rate: Some(0.8),
                });
            }
            Preset::Daycore => {
                self.timescale = Some(Timescale {
                    speed: Some(0.85),
                    pitch: Some(0.85),
                    rate: Some(1.0),
                });
            }
            Preset::Distortion => {
                self.distortion = Some(Distortion {
                    sin_offset: Some(0.0),
                    sin_scale: Some(1.0),
                    cos_offset: Some(0.0),
                    cos_scale: Some(1.0),
                    tan_offset: Some(0.0),
                    tan_scale: Some(1.0),
                    offset: Some(0.0),
                    scale: Some(1.0),
                });
            }
        }

        self.status |= preset.bit();
    }

    /// Removes a named preset, clearing its underlying field and flag.
    pub fn remove_preset(&mut self, preset: Preset) {
        if !self.is_enabled(preset) {
            return;
        }

        match preset {
            Preset::Bassboost | Preset::Pop | Preset::Soft | Preset::TrebleBass | Preset::Tv => {
                self.equalizer = None
            }
            Preset::Nightcore | Preset::Vaporwave | Preset::Slowmo | Preset::Daycore => {
                self.timescale = None
            }
            Preset::EightD => self.rotation = None,
            Preset::Karaoke => self.karaoke = None,
            Preset::Vibrato => self.vibrato = None,
            Preset::Distortion => self.distortion = None,
        }

        self.status &= !preset.bit();
    }

    /// Resets every field and every preset flag.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Builds the `filters` object for the player-update call.
    pub fn payload(&self) -> Value {
        serde_json::to_value(FiltersPayload {
            volume: self.volume,
            equalizer: self.equalizer.as_deref().unwrap_or(&[]),
            karaoke: self.karaoke,
            timescale: self.timescale,
            vibrato: self.vibrato,
            rotation: self.rotation,
            distortion: self.distortion,
        })
        .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_write_field_and_flag_together() {
        let mut filters = Filters::default();
        filters.apply_preset(Preset::Nightcore);

        assert!(filters.is_enabled(Preset::Nightcore));
        assert_eq!(filters.timescale.unwrap().speed, Some(1.2));

        filters.set_timescale(None);
        assert!(!filters.is_enabled(Preset::Nightcore));
    }

    #[test]
    fn equalizer_validation_rejects_out_of_range_values() {
        let mut filters = Filters::default();

        let band_err = filters.set_equalizer(Some(vec![Band { band: 15, gain: 0.0 }]));
        assert!(matches!(band_err, Err(Error::EqualizerBandOutOfRange(15))));

        let gain_err = filters.set_equalizer(Some(vec![Band { band: 0, gain: 1.5 }]));
        assert!(matches!(gain_err, Err(Error::EqualizerGainOutOfRange(_))));
    }

    #[test]
    fn clear_resets_fields_and_flags() {
        let mut filters = Filters::default();
        filters.apply_preset(Preset::EightD);
        filters.apply_preset(Preset::Bassboost);
        filters.clear();

        assert!(!filters.is_enabled(Preset::EightD));
        assert!(!filters.is_enabled(Preset::Bassboost));
        assert!(filters.rotation.is_none());
        assert_eq!(filters.payload()["equalizer"], serde_json::json!([]));
    }

    #[test]
    fn payload_serializes_camel_case_fields() {
        let mut filters = Filters::default();
        filters.apply_preset(Preset::EightD);

        assert_eq!(
            filters.payload(),
            serde_json::json!({"equalizer": [], "rotation": {"rotationHz": 0.2}})
        );
    }
}
