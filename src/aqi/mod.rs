pub mod band;
pub mod units;

pub use band::AqiBand;
pub use units::{to_canonical, Unit};

use std::fmt;
use std::str::FromStr;

/// 监测的六种污染物
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm25,
    Pm10,
    O3,
    No2,
    So2,
    Co,
}

impl Pollutant {
    pub const ALL: [Pollutant; 6] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::O3,
        Pollutant::No2,
        Pollutant::So2,
        Pollutant::Co,
    ];

    /// 数据库 pollutants.name 中使用的名称
    pub fn name(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::O3 => "O3",
            Pollutant::No2 => "NO2",
            Pollutant::So2 => "SO2",
            Pollutant::Co => "CO",
        }
    }

    pub fn canonical_unit(&self) -> Unit {
        match self {
            Pollutant::Pm25 | Pollutant::Pm10 => Unit::MicrogramsPerCubicMeter,
            Pollutant::O3 | Pollutant::No2 | Pollutant::So2 => Unit::PartsPerBillion,
            Pollutant::Co => Unit::PartsPerMillion,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "Fine particulate matter with diameter less than 2.5 micrometers",
            Pollutant::Pm10 => "Particulate matter with diameter less than 10 micrometers",
            Pollutant::O3 => "Ground-level ozone",
            Pollutant::No2 => "Nitrogen dioxide",
            Pollutant::So2 => "Sulfur dioxide",
            Pollutant::Co => "Carbon monoxide",
        }
    }

    /// EPA 分段表：(浓度下限, 浓度上限, AQI 下限, AQI 上限)，浓度为 canonical 单位
    fn breakpoints(&self) -> &'static [(f64, f64, i32, i32)] {
        match self {
            Pollutant::Pm25 => &[
                (0.0, 12.0, 0, 50),
                (12.1, 35.4, 51, 100),
                (35.5, 55.4, 101, 150),
                (55.5, 150.4, 151, 200),
                (150.5, 250.4, 201, 300),
                (250.5, 500.0, 301, 500),
            ],
            Pollutant::Pm10 => &[
                (0.0, 54.0, 0, 50),
                (55.0, 154.0, 51, 100),
                (155.0, 254.0, 101, 150),
                (255.0, 354.0, 151, 200),
                (355.0, 424.0, 201, 300),
                (425.0, 604.0, 301, 500),
            ],
            Pollutant::O3 => &[
                (0.0, 54.0, 0, 50),
                (55.0, 70.0, 51, 100),
                (71.0, 85.0, 101, 150),
                (86.0, 105.0, 151, 200),
                (106.0, 200.0, 201, 300),
            ],
            Pollutant::No2 => &[
                (0.0, 53.0, 0, 50),
                (54.0, 100.0, 51, 100),
                (101.0, 360.0, 101, 150),
                (361.0, 649.0, 151, 200),
                (650.0, 1249.0, 201, 300),
            ],
            Pollutant::So2 => &[
                (0.0, 35.0, 0, 50),
                (36.0, 75.0, 51, 100),
                (76.0, 185.0, 101, 150),
                (186.0, 304.0, 151, 200),
                (305.0, 604.0, 201, 300),
            ],
            Pollutant::Co => &[
                (0.0, 4.4, 0, 50),
                (4.5, 9.4, 51, 100),
                (9.5, 12.4, 101, 150),
                (12.5, 15.4, 151, 200),
                (15.5, 30.4, 201, 300),
            ],
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pollutant {
    type Err = AqiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '.' | '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "pm25" => Ok(Pollutant::Pm25),
            "pm10" => Ok(Pollutant::Pm10),
            "o3" | "ozone" => Ok(Pollutant::O3),
            "no2" => Ok(Pollutant::No2),
            "so2" => Ok(Pollutant::So2),
            "co" => Ok(Pollutant::Co),
            _ => Err(AqiError::UnknownPollutant(s.to_string())),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AqiError {
    #[error("unknown pollutant: {0}")]
    UnknownPollutant(String),
    #[error("invalid concentration {value} for {pollutant}")]
    InvalidConcentration { pollutant: Pollutant, value: f64 },
    #[error("invalid aqi: {0}")]
    InvalidAqi(i32),
}

pub const AQI_MAX: i32 = 500;

/// 按 EPA 分段线性插值计算 AQI，结果截断取整。
///
/// 浓度落在两段之间的空隙时按下一段的下界计算；超过最后一段返回 500。
pub fn calculate_aqi(pollutant: Pollutant, concentration: f64) -> Result<i32, AqiError> {
    if !concentration.is_finite() || concentration < 0.0 {
        return Err(AqiError::InvalidConcentration {
            pollutant,
            value: concentration,
        });
    }
    for &(c_lo, c_hi, i_lo, i_hi) in pollutant.breakpoints() {
        if concentration <= c_hi {
            let c = concentration.max(c_lo);
            let aqi = i_lo as f64 + (i_hi - i_lo) as f64 * (c - c_lo) / (c_hi - c_lo);
            // 浮点误差会让 49.999999 截断成 49
            return Ok((aqi + 1e-9) as i32);
        }
    }
    Ok(AQI_MAX)
}

/// 由 AQI 反推浓度（IQAir 只给出 US AQI）
pub fn estimate_concentration(pollutant: Pollutant, aqi: i32) -> Result<f64, AqiError> {
    if aqi < 0 {
        return Err(AqiError::InvalidAqi(aqi));
    }
    let table = pollutant.breakpoints();
    let aqi = aqi.min(AQI_MAX);
    for &(c_lo, c_hi, i_lo, i_hi) in table {
        if aqi <= i_hi {
            let a = aqi.max(i_lo);
            let c = c_lo + (a - i_lo) as f64 * (c_hi - c_lo) / (i_hi - i_lo) as f64;
            return Ok(round2(c));
        }
    }
    // 表上限低于 500 的污染物（O3/NO2/SO2/CO）取最后一段上限
    Ok(table.last().map(|t| t.1).unwrap_or(0.0))
}

pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pm25_breakpoints() {
        assert_eq!(calculate_aqi(Pollutant::Pm25, 0.0).unwrap(), 0);
        assert_eq!(calculate_aqi(Pollutant::Pm25, 12.0).unwrap(), 50);
        assert_eq!(calculate_aqi(Pollutant::Pm25, 35.4).unwrap(), 100);
        // 55.5 -> 151
        assert_eq!(calculate_aqi(Pollutant::Pm25, 55.5).unwrap(), 151);
        // 中间值：(100-51)/(35.4-12.1)*(20-12.1)+51 = 67.6
        assert_eq!(calculate_aqi(Pollutant::Pm25, 20.0).unwrap(), 67);
    }

    #[test]
    fn gap_between_rows_uses_next_lower_bound() {
        assert_eq!(calculate_aqi(Pollutant::Pm25, 12.05).unwrap(), 51);
        assert_eq!(calculate_aqi(Pollutant::Pm10, 54.5).unwrap(), 51);
    }

    #[test]
    fn above_table_is_hazardous_max() {
        assert_eq!(calculate_aqi(Pollutant::Pm25, 900.0).unwrap(), 500);
        assert_eq!(calculate_aqi(Pollutant::O3, 250.0).unwrap(), 500);
    }

    #[test]
    fn rejects_negative_and_nan() {
        assert!(calculate_aqi(Pollutant::Co, -1.0).is_err());
        assert!(calculate_aqi(Pollutant::Co, f64::NAN).is_err());
    }

    #[test]
    fn gases_use_their_own_tables() {
        assert_eq!(calculate_aqi(Pollutant::Co, 4.4).unwrap(), 50);
        assert_eq!(calculate_aqi(Pollutant::No2, 100.0).unwrap(), 100);
        assert_eq!(calculate_aqi(Pollutant::So2, 75.0).unwrap(), 100);
    }

    #[test]
    fn estimate_is_inverse_at_breakpoints() {
        assert_eq!(estimate_concentration(Pollutant::Pm25, 50).unwrap(), 12.0);
        assert_eq!(estimate_concentration(Pollutant::Pm25, 100).unwrap(), 35.4);
        assert_eq!(estimate_concentration(Pollutant::Pm25, 0).unwrap(), 0.0);
        assert_eq!(estimate_concentration(Pollutant::Pm25, 800).unwrap(), 500.0);
        assert!(estimate_concentration(Pollutant::Pm25, -3).is_err());
    }

    #[test]
    fn estimate_then_calculate_stays_in_band() {
        for aqi in [10, 75, 120, 180, 250, 400] {
            let c = estimate_concentration(Pollutant::Pm25, aqi).unwrap();
            let back = calculate_aqi(Pollutant::Pm25, c).unwrap();
            assert_eq!(AqiBand::from_aqi(back), AqiBand::from_aqi(aqi), "aqi={aqi}");
        }
    }

    #[test]
    fn parses_provider_codes() {
        assert_eq!("pm25".parse::<Pollutant>().unwrap(), Pollutant::Pm25);
        assert_eq!("PM2.5".parse::<Pollutant>().unwrap(), Pollutant::Pm25);
        assert_eq!("pm_10".parse::<Pollutant>().unwrap(), Pollutant::Pm10);
        assert_eq!("O3".parse::<Pollutant>().unwrap(), Pollutant::O3);
        assert!("nh3".parse::<Pollutant>().is_err());
    }
}
