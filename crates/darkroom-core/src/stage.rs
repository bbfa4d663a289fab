//! Stage kinds and requested stage specifications.

use crate::fingerprint::StageParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the background-removal stage.
pub const BG_REMOVAL: &str = "bg-removal";

/// Pixel-level stylisation effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    FilmBw,
    FilmColor,
    Halation,
    Dither,
    Posterize,
    PaletteMatch,
}

impl EffectKind {
    pub const ALL: [EffectKind; 6] = [
        EffectKind::FilmBw,
        EffectKind::FilmColor,
        EffectKind::Halation,
        EffectKind::Dither,
        EffectKind::Posterize,
        EffectKind::PaletteMatch,
    ];

    pub fn short_name(&self) -> &'static str {
        match self {
            EffectKind::FilmBw => "filmbw",
            EffectKind::FilmColor => "filmcolor",
            EffectKind::Halation => "halation",
            EffectKind::Dither => "dither",
            EffectKind::Posterize => "posterize",
            EffectKind::PaletteMatch => "palette",
        }
    }
}

/// Every stage the pipeline knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StageKind {
    BackgroundRemoval,
    Effect(EffectKind),
}

impl StageKind {
    /// Canonical stage name, used in cache keys and reports.
    pub fn name(&self) -> String {
        match self {
            StageKind::BackgroundRemoval => BG_REMOVAL.to_string(),
            StageKind::Effect(effect) => format!("effect:{}", effect.short_name()),
        }
    }

    pub fn is_background_removal(&self) -> bool {
        matches!(self, StageKind::BackgroundRemoval)
    }
}

impl FromStr for StageKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == BG_REMOVAL {
            return Ok(StageKind::BackgroundRemoval);
        }
        let short = s.strip_prefix("effect:").unwrap_or(s);
        EffectKind::ALL
            .iter()
            .find(|e| e.short_name() == short)
            .map(|e| StageKind::Effect(*e))
            .ok_or_else(|| Error::InvalidRequest(format!("Unknown stage: {}", s)))
    }
}

impl TryFrom<String> for StageKind {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<StageKind> for String {
    fn from(value: StageKind) -> Self {
        value.name()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One requested stage: what to run and how it is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub kind: StageKind,
    #[serde(default)]
    pub params: StageParams,
}

impl StageSpec {
    pub fn new(kind: StageKind, params: StageParams) -> Self {
        Self { kind, params }
    }

    pub fn background_removal() -> Self {
        Self::new(StageKind::BackgroundRemoval, StageParams::new())
    }

    pub fn effect(effect: EffectKind, params: StageParams) -> Self {
        Self::new(StageKind::Effect(effect), params)
    }

    /// Parse `name[:k=v,k=v]`, e.g. `effect:filmbw:contrast=1.12`.
    pub fn parse(spec: &str) -> Result<Self> {
        let (name, raw_params) = match spec.rsplit_once(':') {
            Some((head, tail)) if tail.contains('=') => (head, Some(tail)),
            _ => (spec, None),
        };
        let kind: StageKind = name.parse()?;
        let mut params = StageParams::new();
        if let Some(raw) = raw_params {
            for pair in raw.split(',').filter(|p| !p.is_empty()) {
                let (k, v) = pair.split_once('=').ok_or_else(|| {
                    Error::InvalidRequest(format!("Malformed stage parameter: {}", pair))
                })?;
                params.insert(k.trim(), crate::ParamValue::parse_loose(v.trim()));
            }
        }
        Ok(Self { kind, params })
    }

    pub fn name(&self) -> String {
        self.kind.name()
    }
}
