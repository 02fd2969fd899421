//! Audio filter configuration sent to the node.
//!
//! Nothing here touches audio: a [`FilterOptions`] value is serialized into
//! the `filters` command and the node does the processing. The player keeps
//! the last applied set so it can be replayed after a node migration.

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};

use crate::error::{LinkError, LinkResult};

/// Número de bandas del ecualizador del nodo
pub const EQ_BANDS: usize = 15;

pub const MIN_GAIN: f32 = -0.25;
pub const MAX_GAIN: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KaraokeOptions {
    pub level: f32,
    pub mono_level: f32,
    pub filter_band: f32,
    pub filter_width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimescaleOptions {
    pub speed: f64,
    pub pitch: f64,
    pub rate: f64,
}

impl Default for TimescaleOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            rate: 1.0,
        }
    }
}

/// Shared shape of tremolo and vibrato.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OscillatorOptions {
    pub frequency: f32,
    pub depth: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationOptions {
    pub rotation_hz: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistortionOptions {
    pub sin_offset: f32,
    pub sin_scale: f32,
    pub cos_offset: f32,
    pub cos_scale: f32,
    pub tan_offset: f32,
    pub tan_scale: f32,
    pub offset: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMixOptions {
    pub left_to_left: f32,
    pub left_to_right: f32,
    pub right_to_left: f32,
    pub right_to_right: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LowPassOptions {
    pub smoothing: f32,
}

/// Active filter set. Every field is optional; an empty set clears filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_bands"
    )]
    pub equalizer: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub karaoke: Option<KaraokeOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timescale: Option<TimescaleOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tremolo: Option<OscillatorOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vibrato: Option<OscillatorOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<RotationOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distortion: Option<DistortionOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_mix: Option<ChannelMixOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_pass: Option<LowPassOptions>,
}

// El nodo espera `[{band, gain}]`, no una lista plana
fn serialize_bands<S: Serializer>(bands: &Option<Vec<f32>>, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct Band {
        band: usize,
        gain: f32,
    }

    let bands = bands.as_deref().unwrap_or_default();
    let mut seq = serializer.serialize_seq(Some(bands.len()))?;
    for (band, &gain) in bands.iter().enumerate() {
        seq.serialize_element(&Band { band, gain })?;
    }
    seq.end()
}

impl FilterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` si hay algún filtro activo
    pub fn is_enabled(&self) -> bool {
        *self != Self::default()
    }

    /// Multiplicador de volumen (1.0 = 100%)
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_equalizer(mut self, gains: Vec<f32>) -> Self {
        self.equalizer = Some(gains);
        self
    }

    pub fn with_preset(self, preset: EqPreset) -> Self {
        self.with_equalizer(preset.gains().to_vec())
    }

    pub fn with_karaoke(mut self, karaoke: KaraokeOptions) -> Self {
        self.karaoke = Some(karaoke);
        self
    }

    pub fn with_timescale(mut self, timescale: TimescaleOptions) -> Self {
        self.timescale = Some(timescale);
        self
    }

    pub fn with_tremolo(mut self, tremolo: OscillatorOptions) -> Self {
        self.tremolo = Some(tremolo);
        self
    }

    pub fn with_vibrato(mut self, vibrato: OscillatorOptions) -> Self {
        self.vibrato = Some(vibrato);
        self
    }

    pub fn with_rotation(mut self, rotation: RotationOptions) -> Self {
        self.rotation = Some(rotation);
        self
    }

    pub fn with_distortion(mut self, distortion: DistortionOptions) -> Self {
        self.distortion = Some(distortion);
        self
    }

    pub fn with_channel_mix(mut self, channel_mix: ChannelMixOptions) -> Self {
        self.channel_mix = Some(channel_mix);
        self
    }

    pub fn with_low_pass(mut self, low_pass: LowPassOptions) -> Self {
        self.low_pass = Some(low_pass);
        self
    }

    /// Rejects values the node would refuse.
    pub fn validate(&self) -> LinkResult<()> {
        if let Some(volume) = self.volume {
            if !(0.0..=5.0).contains(&volume) {
                return Err(LinkError::InvalidFilter(format!(
                    "volume {} out of range (0.0 - 5.0)",
                    volume
                )));
            }
        }

        if let Some(bands) = &self.equalizer {
            if bands.len() > EQ_BANDS {
                return Err(LinkError::InvalidFilter(format!(
                    "equalizer has {} bands (max {})",
                    bands.len(),
                    EQ_BANDS
                )));
            }
            for (i, &gain) in bands.iter().enumerate() {
                if !(MIN_GAIN..=MAX_GAIN).contains(&gain) {
                    return Err(LinkError::InvalidFilter(format!(
                        "gain out of range in band {}: {} (must be between {} and {})",
                        i, gain, MIN_GAIN, MAX_GAIN
                    )));
                }
            }
        }

        if let Some(timescale) = &self.timescale {
            if timescale.speed <= 0.0 || timescale.pitch <= 0.0 || timescale.rate <= 0.0 {
                return Err(LinkError::InvalidFilter(
                    "timescale values must be greater than 0".into(),
                ));
            }
        }

        for (name, osc) in [("tremolo", &self.tremolo), ("vibrato", &self.vibrato)] {
            if let Some(osc) = osc {
                if osc.frequency <= 0.0 || !(0.0..=1.0).contains(&osc.depth) || osc.depth == 0.0 {
                    return Err(LinkError::InvalidFilter(format!(
                        "{} needs frequency > 0 and depth in (0, 1]",
                        name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Factor que aplica el timescale a la posición reportada
    pub fn playback_rate(&self) -> f64 {
        self.timescale
            .map(|t| t.rate * t.speed)
            .unwrap_or(1.0)
    }

    /// Volumen en porcentaje
    pub fn volume_percent(&self) -> f32 {
        self.volume.unwrap_or(1.0) * 100.0
    }
}

/// Presets de ecualizador
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqPreset {
    Flat,
    Bass,
    Pop,
    Rock,
    Jazz,
    Classical,
    Electronic,
    Vocal,
}

impl EqPreset {
    /// Ganancias por banda (25 Hz .. 16 kHz)
    pub fn gains(self) -> [f32; EQ_BANDS] {
        match self {
            EqPreset::Flat => [0.0; EQ_BANDS],
            EqPreset::Bass => [
                0.3, 0.25, 0.2, 0.15, 0.1, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            ],
            EqPreset::Pop => [
                -0.05, 0.0, 0.1, 0.15, 0.2, 0.25, 0.2, 0.1, 0.0, -0.05, -0.05, -0.05, 0.0, 0.0, 0.0,
            ],
            EqPreset::Rock => [
                0.25, 0.2, 0.15, 0.1, 0.05, -0.05, -0.05, 0.0, 0.05, 0.1, 0.15, 0.2, 0.2, 0.2, 0.2,
            ],
            EqPreset::Jazz => [
                0.0, 0.05, 0.05, 0.1, 0.15, 0.1, 0.05, 0.0, 0.05, 0.1, 0.1, 0.15, 0.15, 0.15, 0.15,
            ],
            EqPreset::Classical => [
                0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.1, -0.1, -0.1, -0.1, -0.15, -0.15, -0.15,
            ],
            EqPreset::Electronic => [
                0.25, 0.2, 0.1, 0.05, 0.0, -0.1, 0.0, 0.1, 0.05, 0.0, 0.1, 0.15, 0.2, 0.2, 0.2,
            ],
            EqPreset::Vocal => [
                -0.1, -0.05, 0.0, 0.0, 0.1, 0.2, 0.2, 0.15, 0.1, 0.05, 0.0, 0.0, -0.05, -0.05, -0.05,
            ],
        }
    }

    /// Obtiene un preset por nombre
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "flat" | "normal" => Some(EqPreset::Flat),
            "bass" => Some(EqPreset::Bass),
            "pop" => Some(EqPreset::Pop),
            "rock" => Some(EqPreset::Rock),
            "jazz" => Some(EqPreset::Jazz),
            "classical" => Some(EqPreset::Classical),
            "electronic" => Some(EqPreset::Electronic),
            "vocal" => Some(EqPreset::Vocal),
            _ => None,
        }
    }

    pub fn list() -> &'static [&'static str] {
        &["flat", "bass", "pop", "rock", "jazz", "classical", "electronic", "vocal"]
    }
}
