use super::Pollutant;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    MicrogramsPerCubicMeter,
    PartsPerBillion,
    PartsPerMillion,
}

impl Unit {
    pub fn symbol(&self) -> &'static str {
        match self {
            Unit::MicrogramsPerCubicMeter => "μg/m³",
            Unit::PartsPerBillion => "ppb",
            Unit::PartsPerMillion => "ppm",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum UnitError {
    #[error("unknown unit: {0}")]
    Unknown(String),
    #[error("{pollutant} cannot be expressed in {unit}")]
    Incompatible { pollutant: Pollutant, unit: Unit },
}

impl FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['µ', 'μ'], "u");
        match key.as_str() {
            "micrograms_per_cubic_meter" | "ug/m3" | "ug/m³" | "ugm3" => {
                Ok(Unit::MicrogramsPerCubicMeter)
            }
            "parts_per_billion" | "ppb" => Ok(Unit::PartsPerBillion),
            "parts_per_million" | "ppm" => Ok(Unit::PartsPerMillion),
            _ => Err(UnitError::Unknown(s.to_string())),
        }
    }
}

/// 25°C、1 atm 下 1 ppb 对应的 μg/m³
fn ppb_to_ugm3_factor(pollutant: Pollutant) -> Option<f64> {
    match pollutant {
        Pollutant::No2 => Some(1.88),
        Pollutant::O3 => Some(1.96),
        Pollutant::So2 => Some(2.62),
        // 1 ppm CO = 1145 μg/m³
        Pollutant::Co => Some(1.145),
        Pollutant::Pm25 | Pollutant::Pm10 => None,
    }
}

/// 把任意来源单位的浓度换算为该污染物的 canonical 单位
pub fn to_canonical(pollutant: Pollutant, value: f64, unit: Unit) -> Result<f64, UnitError> {
    let target = pollutant.canonical_unit();
    if unit == target {
        return Ok(value);
    }
    let factor = ppb_to_ugm3_factor(pollutant).ok_or(UnitError::Incompatible { pollutant, unit })?;

    // 先统一到 ppb，再换到目标单位
    let ppb = match unit {
        Unit::PartsPerBillion => value,
        Unit::PartsPerMillion => value * 1000.0,
        Unit::MicrogramsPerCubicMeter => value / factor,
    };
    Ok(match target {
        Unit::PartsPerBillion => ppb,
        Unit::PartsPerMillion => ppb / 1000.0,
        Unit::MicrogramsPerCubicMeter => ppb * factor,
    })
}
