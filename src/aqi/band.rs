#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AqiBand {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiBand {
    pub fn from_aqi(aqi: i32) -> Self {
        match aqi {
            i32::MIN..=50 => AqiBand::Good,
            51..=100 => AqiBand::Moderate,
            101..=150 => AqiBand::UnhealthySensitive,
            151..=200 => AqiBand::Unhealthy,
            201..=300 => AqiBand::VeryUnhealthy,
            _ => AqiBand::Hazardous,
        }
    }

    /// 日均值等非整数 AQI 使用
    pub fn from_mean(aqi: f64) -> Self {
        Self::from_aqi(aqi.ceil() as i32)
    }

    /// recommendations.aqi_band 存储的 0..=5 编号
    pub fn index(&self) -> i32 {
        *self as i32
    }

    pub fn label(&self) -> &'static str {
        match self {
            AqiBand::Good => "Good",
            AqiBand::Moderate => "Moderate",
            AqiBand::UnhealthySensitive => "Unhealthy for Sensitive Groups",
            AqiBand::Unhealthy => "Unhealthy",
            AqiBand::VeryUnhealthy => "Very Unhealthy",
            AqiBand::Hazardous => "Hazardous",
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            AqiBand::Good => "🟢",
            AqiBand::Moderate => "🟡",
            AqiBand::UnhealthySensitive => "🟠",
            AqiBand::Unhealthy => "🔴",
            AqiBand::VeryUnhealthy => "🟣",
            AqiBand::Hazardous => "🟤",
        }
    }

    pub fn health_advice(&self) -> &'static str {
        match self {
            AqiBand::Good => "Air quality is satisfactory. Enjoy outdoor activities.",
            AqiBand::Moderate => {
                "Air quality is acceptable. Unusually sensitive people should consider limiting prolonged outdoor exertion."
            }
            AqiBand::UnhealthySensitive => {
                "Sensitive groups may experience health effects. Reduce prolonged outdoor exertion."
            }
            AqiBand::Unhealthy => "Everyone may begin to experience health effects. Limit time outdoors.",
            AqiBand::VeryUnhealthy => "Health alert: everyone should avoid outdoor exertion.",
            AqiBand::Hazardous => "Health emergency: stay indoors with windows closed.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn band_edges() {
        assert_eq!(AqiBand::from_aqi(0), AqiBand::Good);
        assert_eq!(AqiBand::from_aqi(50), AqiBand::Good);
        assert_eq!(AqiBand::from_aqi(51), AqiBand::Moderate);
        assert_eq!(AqiBand::from_aqi(150), AqiBand::UnhealthySensitive);
        assert_eq!(AqiBand::from_aqi(200), AqiBand::Unhealthy);
        assert_eq!(AqiBand::from_aqi(300), AqiBand::VeryUnhealthy);
        assert_eq!(AqiBand::from_aqi(301), AqiBand::Hazardous);
    }

    #[test]
    fn index_matches_stored_codes() {
        assert_eq!(AqiBand::Good.index(), 0);
        assert_eq!(AqiBand::Hazardous.index(), 5);
        assert_eq!(AqiBand::from_mean(50.2), AqiBand::Moderate);
    }
}
