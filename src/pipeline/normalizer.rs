//! 原始载荷 → 标准读数，并带去重地写入数据库。

use crate::aqi::{self, Pollutant, Unit};
use crate::providers::ProviderFormat;
use crate::storage::entity::provider::Model as ProviderModel;
use crate::storage::repository::{
    LogRepository, NewReading, PollutantRepository, ReadingRepository, StationDescriptor,
    StationRepository,
};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use log::{info, warn};
use sea_orm::DatabaseConnection;
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_COUNTRY: &str = "Colombia";
/// Google 载荷不带站点信息时使用的默认位置（Bogotá）
const GOOGLE_DEFAULT: (&str, f64, f64) = ("Bogotá", 4.6097, -74.0817);

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum NormalizeError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("coordinates out of range: ({lat}, {lon})")]
    InvalidCoordinates { lat: f64, lon: f64 },
    #[error("provider reported status {0}")]
    ProviderStatus(String),
    #[error("record has no usable pollutant values")]
    NoReadings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedReading {
    pub station: StationDescriptor,
    pub pollutant: Pollutant,
    pub recorded_at: i64,
    pub value: f64,
    pub aqi: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeStats {
    pub total_records: usize,
    /// 通过校验的记录数
    pub validated: usize,
    /// 新写入的读数
    pub saved: usize,
    /// 命中唯一键被跳过的读数
    pub duplicates: usize,
    /// 失败的记录数
    pub errors: usize,
    pub error_details: Vec<String>,
}

/// 把一条原始记录拆成每个污染物一条的标准读数
pub fn normalize(
    format: ProviderFormat,
    record: &Value,
) -> Result<Vec<NormalizedReading>, NormalizeError> {
    let readings = match format {
        ProviderFormat::Aqicn => normalize_aqicn(record)?,
        ProviderFormat::Google => normalize_google(record)?,
        ProviderFormat::Iqair => normalize_iqair(record)?,
    };
    if readings.is_empty() {
        return Err(NormalizeError::NoReadings);
    }
    Ok(readings)
}

fn normalize_aqicn(record: &Value) -> Result<Vec<NormalizedReading>, NormalizeError> {
    check_status(record, "ok")?;
    let data = record
        .get("data")
        .filter(|d| d.is_object())
        .ok_or(NormalizeError::MissingField("data"))?;

    let city = data
        .pointer("/city/name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingField("data.city.name"))?;
    let geo = data
        .pointer("/city/geo")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MissingField("data.city.geo"))?;
    let (lat, lon) = match (
        geo.first().and_then(Value::as_f64),
        geo.get(1).and_then(Value::as_f64),
    ) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => return Err(NormalizeError::MissingField("data.city.geo")),
    };
    check_coordinates(lat, lon)?;

    let s = data
        .pointer("/time/s")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("data.time.s"))?;
    let tz = data.pointer("/time/tz").and_then(Value::as_str);
    let recorded_at = parse_local_time(s, tz)?;

    let station = StationDescriptor {
        name: format!("{city} Station"),
        city: city.to_string(),
        country: DEFAULT_COUNTRY.to_string(),
        latitude: lat,
        longitude: lon,
    };

    let iaqi = data
        .get("iaqi")
        .and_then(Value::as_object)
        .ok_or(NormalizeError::MissingField("data.iaqi"))?;

    let mut out = Vec::new();
    for (code, entry) in iaqi {
        // iaqi 里还有温度湿度等非污染物字段
        let Ok(pollutant) = code.parse::<Pollutant>() else {
            continue;
        };
        let Some(v) = entry.get("v").and_then(Value::as_f64) else {
            warn!("aqicn {city}: non-numeric value for {code}");
            continue;
        };
        if let Some(r) = build_reading(&station, pollutant, recorded_at, v, pollutant.canonical_unit()) {
            out.push(r);
        }
    }
    Ok(out)
}

fn normalize_google(record: &Value) -> Result<Vec<NormalizedReading>, NormalizeError> {
    let dt = record
        .get("dateTime")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("dateTime"))?;
    let recorded_at = parse_rfc3339(dt)?;

    let (city, lat, lon) = match record.get("location") {
        Some(loc) => {
            let lat = loc
                .get("latitude")
                .and_then(Value::as_f64)
                .ok_or(NormalizeError::MissingField("location.latitude"))?;
            let lon = loc
                .get("longitude")
                .and_then(Value::as_f64)
                .ok_or(NormalizeError::MissingField("location.longitude"))?;
            let city = loc
                .get("city")
                .and_then(Value::as_str)
                .unwrap_or(GOOGLE_DEFAULT.0)
                .to_string();
            (city, lat, lon)
        }
        None => (GOOGLE_DEFAULT.0.to_string(), GOOGLE_DEFAULT.1, GOOGLE_DEFAULT.2),
    };
    check_coordinates(lat, lon)?;

    let country = match record.get("regionCode").and_then(Value::as_str) {
        Some("CO") | None => DEFAULT_COUNTRY.to_string(),
        Some(other) => other.to_string(),
    };
    let station = StationDescriptor {
        name: format!("Google Station {city}"),
        city,
        country,
        latitude: lat,
        longitude: lon,
    };

    let pollutants = record
        .get("pollutants")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MissingField("pollutants"))?;

    let mut out = Vec::new();
    for p in pollutants {
        let Some(code) = p.get("code").and_then(Value::as_str) else {
            continue;
        };
        let Ok(pollutant) = code.parse::<Pollutant>() else {
            continue;
        };
        let Some(v) = p.pointer("/concentration/value").and_then(Value::as_f64) else {
            warn!("google {}: non-numeric value for {code}", station.city);
            continue;
        };
        let unit = match p
            .pointer("/concentration/units")
            .and_then(Value::as_str)
            .map(str::parse::<Unit>)
        {
            Some(Ok(u)) => u,
            Some(Err(e)) => {
                warn!("google {}: {e}", station.city);
                continue;
            }
            None => pollutant.canonical_unit(),
        };
        if let Some(r) = build_reading(&station, pollutant, recorded_at, v, unit) {
            out.push(r);
        }
    }
    Ok(out)
}

fn normalize_iqair(record: &Value) -> Result<Vec<NormalizedReading>, NormalizeError> {
    check_status(record, "success")?;
    let data = record
        .get("data")
        .filter(|d| d.is_object())
        .ok_or(NormalizeError::MissingField("data"))?;

    let city = data
        .get("city")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingField("data.city"))?;
    let coords = data
        .pointer("/location/coordinates")
        .and_then(Value::as_array)
        .ok_or(NormalizeError::MissingField("data.location.coordinates"))?;
    // GeoJSON 顺序：[经度, 纬度]
    let (lon, lat) = match (
        coords.first().and_then(Value::as_f64),
        coords.get(1).and_then(Value::as_f64),
    ) {
        (Some(lon), Some(lat)) => (lon, lat),
        _ => return Err(NormalizeError::MissingField("data.location.coordinates")),
    };
    check_coordinates(lat, lon)?;

    let pollution = data
        .pointer("/current/pollution")
        .ok_or(NormalizeError::MissingField("data.current.pollution"))?;
    let ts = pollution
        .get("ts")
        .and_then(Value::as_str)
        .ok_or(NormalizeError::MissingField("data.current.pollution.ts"))?;
    let recorded_at = parse_rfc3339(ts)?;
    let aqius = pollution
        .get("aqius")
        .and_then(Value::as_i64)
        .ok_or(NormalizeError::MissingField("data.current.pollution.aqius"))?;

    let station = StationDescriptor {
        name: format!("{city} IQAir Station"),
        city: city.to_string(),
        country: data
            .get("country")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_COUNTRY)
            .to_string(),
        latitude: lat,
        longitude: lon,
    };

    // 只给出 US AQI，按 PM2.5 反推浓度，AQI 保留上报值
    let aqi = i32::try_from(aqius).unwrap_or(aqi::AQI_MAX);
    let Ok(value) = aqi::estimate_concentration(Pollutant::Pm25, aqi) else {
        return Ok(Vec::new());
    };
    Ok(vec![NormalizedReading {
        station,
        pollutant: Pollutant::Pm25,
        recorded_at,
        value,
        aqi: Some(aqi),
    }])
}

fn build_reading(
    station: &StationDescriptor,
    pollutant: Pollutant,
    recorded_at: i64,
    raw_value: f64,
    unit: Unit,
) -> Option<NormalizedReading> {
    if !raw_value.is_finite() || raw_value < 0.0 {
        warn!(
            "{}: dropping invalid {pollutant} value {raw_value}",
            station.name
        );
        return None;
    }
    let value = match aqi::to_canonical(pollutant, raw_value, unit) {
        Ok(v) => aqi::round2(v),
        Err(e) => {
            warn!("{}: {e}", station.name);
            return None;
        }
    };
    let aqi = aqi::calculate_aqi(pollutant, value).ok();
    Some(NormalizedReading {
        station: station.clone(),
        pollutant,
        recorded_at,
        value,
        aqi,
    })
}

fn check_status(record: &Value, expected: &str) -> Result<(), NormalizeError> {
    match record.get("status").and_then(Value::as_str) {
        Some(s) if s != expected => Err(NormalizeError::ProviderStatus(s.to_string())),
        _ => Ok(()),
    }
}

fn check_coordinates(lat: f64, lon: f64) -> Result<(), NormalizeError> {
    if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        Err(NormalizeError::InvalidCoordinates { lat, lon })
    }
}

fn parse_rfc3339(s: &str) -> Result<i64, NormalizeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc).timestamp())
        .map_err(|_| NormalizeError::InvalidTimestamp(s.to_string()))
}

/// "YYYY-MM-DD HH:MM:SS" 加可选 "+HH:MM" 偏移，转为 UTC 秒
fn parse_local_time(s: &str, tz: Option<&str>) -> Result<i64, NormalizeError> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S")
        .map_err(|_| NormalizeError::InvalidTimestamp(s.to_string()))?;
    let offset = match tz {
        Some(tz) => parse_offset(tz).ok_or_else(|| NormalizeError::InvalidTimestamp(tz.to_string()))?,
        None => 0,
    };
    let fixed = FixedOffset::east_opt(offset)
        .ok_or_else(|| NormalizeError::InvalidTimestamp(s.to_string()))?;
    fixed
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc).timestamp())
        .ok_or_else(|| NormalizeError::InvalidTimestamp(s.to_string()))
}

fn parse_offset(tz: &str) -> Option<i32> {
    let tz = tz.trim();
    let (sign, rest) = match tz.chars().next()? {
        '+' => (1, &tz[1..]),
        '-' => (-1, &tz[1..]),
        _ => return None,
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if h > 14 || m >= 60 {
        return None;
    }
    Some(sign * (h * 3600 + m * 60))
}

/// 带缓存的标准化与落库
pub struct DataNormalizer {
    pollutant_ids: HashMap<String, i32>,
    station_ids: HashMap<(String, String), i32>,
}

impl DataNormalizer {
    pub async fn load(db: &DatabaseConnection) -> Result<Self, sea_orm::DbErr> {
        let pollutant_ids = PollutantRepository::id_map(db).await?;
        let station_ids = StationRepository::list_all(db)
            .await?
            .into_iter()
            .map(|s| ((s.name, s.city), s.id))
            .collect();
        Ok(Self {
            pollutant_ids,
            station_ids,
        })
    }

    pub async fn normalize_and_save(
        &mut self,
        db: &DatabaseConnection,
        provider: &ProviderModel,
        format: ProviderFormat,
        records: &[Value],
    ) -> NormalizeStats {
        let mut stats = NormalizeStats {
            total_records: records.len(),
            ..Default::default()
        };

        for record in records {
            let result = match normalize(format, record) {
                Ok(readings) => {
                    stats.validated += 1;
                    self.save_readings(db, provider.id, record, readings).await
                }
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok((saved, dup)) => {
                    stats.saved += saved;
                    stats.duplicates += dup;
                }
                Err(msg) => {
                    stats.errors += 1;
                    let detail = format!("Error normalizing record: {msg}");
                    warn!("{}: {detail}", provider.name);
                    stats.error_details.push(detail);
                    if let Err(e) = LogRepository::insert_error(
                        db,
                        &provider.name,
                        "normalization_error",
                        &msg,
                        &record.to_string(),
                    )
                    .await
                    {
                        warn!("failed to write error log: {e}");
                    }
                }
            }
        }

        info!(
            "{}: normalization complete: {} saved, {} duplicates, {} errors",
            provider.name, stats.saved, stats.duplicates, stats.errors
        );
        stats
    }

    async fn save_readings(
        &mut self,
        db: &DatabaseConnection,
        provider_id: i32,
        record: &Value,
        readings: Vec<NormalizedReading>,
    ) -> Result<(usize, usize), String> {
        let raw_json = record.to_string();
        let mut saved = 0;
        let mut duplicates = 0;

        for r in readings {
            let station_id = self
                .station_id(db, &r.station, provider_id)
                .await
                .map_err(|e| e.to_string())?;
            let Some(&pollutant_id) = self.pollutant_ids.get(r.pollutant.name()) else {
                return Err(format!("pollutant {} is not registered", r.pollutant));
            };
            let inserted = ReadingRepository::insert_if_absent(
                db,
                NewReading {
                    station_id,
                    pollutant_id,
                    provider_id: Some(provider_id),
                    recorded_at: r.recorded_at,
                    value: r.value,
                    aqi: r.aqi,
                    raw_json: raw_json.clone(),
                },
            )
            .await
            .map_err(|e| e.to_string())?;
            if inserted {
                saved += 1;
            } else {
                duplicates += 1;
            }
        }
        Ok((saved, duplicates))
    }

    async fn station_id(
        &mut self,
        db: &DatabaseConnection,
        desc: &StationDescriptor,
        provider_id: i32,
    ) -> Result<i32, sea_orm::DbErr> {
        let key = (desc.name.clone(), desc.city.clone());
        if let Some(&id) = self.station_ids.get(&key) {
            return Ok(id);
        }
        let station = StationRepository::get_or_create(db, desc, Some(provider_id)).await?;
        self.station_ids.insert(key, station.id);
        Ok(station.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{AqicnMock, GoogleMock, IqairMock};
    use crate::storage::connection::memory_db;
    use crate::storage::repository::ProviderRepository;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 14, 37, 12).unwrap()
    }

    #[test]
    fn aqicn_local_time_converted_to_utc() {
        let record = json!({
            "status": "ok",
            "data": {
                "city": {"name": "Bogota", "geo": [4.6097, -74.0817]},
                "time": {"s": "2024-03-10 09:00:00", "tz": "-05:00"},
                "iaqi": {"pm25": {"v": 20.0}, "co": {"v": 1.2}, "t": {"v": 18}}
            }
        });
        let out = normalize(ProviderFormat::Aqicn, &record).unwrap();
        assert_eq!(out.len(), 2);
        let pm = out.iter().find(|r| r.pollutant == Pollutant::Pm25).unwrap();
        assert_eq!(pm.recorded_at, at().timestamp() - 37 * 60 - 12);
        assert_eq!(pm.station.name, "Bogota Station");
        assert_eq!(pm.aqi, Some(67));
    }

    #[test]
    fn aqicn_drops_negative_values_and_rejects_bad_time() {
        let mut record = AqicnMock.payload("cali", at());
        record["data"]["iaqi"]["pm10"]["v"] = json!(-3.0);
        let out = normalize(ProviderFormat::Aqicn, &record).unwrap();
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|r| r.pollutant != Pollutant::Pm10));

        record["data"]["time"]["s"] = json!("yesterday");
        assert!(matches!(
            normalize(ProviderFormat::Aqicn, &record),
            Err(NormalizeError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn aqicn_error_status_is_rejected() {
        let record = json!({"status": "error", "data": "Unknown station"});
        assert_eq!(
            normalize(ProviderFormat::Aqicn, &record),
            Err(NormalizeError::ProviderStatus("error".to_string()))
        );
    }

    #[test]
    fn google_converts_units_and_uses_attached_location() {
        let record = json!({
            "dateTime": "2024-03-10T14:00:00Z",
            "regionCode": "CO",
            "pollutants": [
                {"code": "no2", "concentration": {"value": 18.8, "units": "MICROGRAMS_PER_CUBIC_METER"}},
                {"code": "pm25", "concentration": {"value": 12.0, "units": "MICROGRAMS_PER_CUBIC_METER"}},
                {"code": "pm10", "concentration": {"value": 30.0, "units": "PARTS_PER_BILLION"}}
            ],
            "location": {"latitude": 6.2442, "longitude": -75.5812, "city": "Medellín"}
        });
        let out = normalize(ProviderFormat::Google, &record).unwrap();
        assert_eq!(out.len(), 2);
        let no2 = out.iter().find(|r| r.pollutant == Pollutant::No2).unwrap();
        assert_eq!(no2.value, 10.0);
        assert_eq!(no2.station.name, "Google Station Medellín");
        assert_eq!(no2.recorded_at, 1_710_079_200);
    }

    #[test]
    fn google_without_location_defaults_to_bogota() {
        let mut record = GoogleMock.payload("x", 0.0, 0.0, at());
        record.as_object_mut().unwrap().remove("location");
        let out = normalize(ProviderFormat::Google, &record).unwrap();
        assert!(out.iter().all(|r| r.station.city == "Bogotá"));
        assert_eq!(out[0].station.latitude, 4.6097);
    }

    #[test]
    fn iqair_estimates_pm25_and_keeps_reported_aqi() {
        let mut record = IqairMock.payload("medellin", at());
        record["data"]["current"]["pollution"]["aqius"] = json!(100);
        let out = normalize(ProviderFormat::Iqair, &record).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 35.4);
        assert_eq!(out[0].aqi, Some(100));
        assert_eq!(out[0].station.name, "Medellin IQAir Station");
        assert_eq!(out[0].station.latitude, 6.2442);
        assert_eq!(out[0].station.longitude, -75.5812);
    }

    #[test]
    fn coordinates_out_of_range_are_rejected() {
        let mut record = IqairMock.payload("cali", at());
        record["data"]["location"]["coordinates"] = json!([3.45, -176.53]);
        assert!(matches!(
            normalize(ProviderFormat::Iqair, &record),
            Err(NormalizeError::InvalidCoordinates { .. })
        ));
    }

    #[test]
    fn offsets_parse() {
        assert_eq!(parse_offset("-05:00"), Some(-5 * 3600));
        assert_eq!(parse_offset("+05:30"), Some(5 * 3600 + 30 * 60));
        assert_eq!(parse_offset("05:00"), None);
    }

    #[tokio::test]
    async fn repeated_records_are_deduplicated() {
        let db = memory_db().await;
        let provider = ProviderRepository::find_by_name(&db, "AQICN Mock")
            .await
            .unwrap()
            .unwrap();
        let records = AqicnMock.all(at());

        let mut normalizer = DataNormalizer::load(&db).await.unwrap();
        let first = normalizer
            .normalize_and_save(&db, &provider, ProviderFormat::Aqicn, &records)
            .await;
        assert_eq!(first.total_records, 5);
        assert_eq!(first.saved, 30);
        assert_eq!(first.duplicates, 0);

        // 新实例，不依赖缓存
        let mut normalizer = DataNormalizer::load(&db).await.unwrap();
        let second = normalizer
            .normalize_and_save(&db, &provider, ProviderFormat::Aqicn, &records)
            .await;
        assert_eq!(second.saved, 0);
        assert_eq!(second.duplicates, 30);
        assert_eq!(ReadingRepository::count(&db).await.unwrap(), 30);
        assert_eq!(StationRepository::list_all(&db).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn bad_records_are_counted_and_logged() {
        use crate::storage::entity::error_log;
        use sea_orm::EntityTrait;

        let db = memory_db().await;
        let provider = ProviderRepository::find_by_name(&db, "IQAir Mock")
            .await
            .unwrap()
            .unwrap();
        let records = vec![IqairMock.payload("cali", at()), json!({"status": "success"})];
        let mut normalizer = DataNormalizer::load(&db).await.unwrap();
        let stats = normalizer
            .normalize_and_save(&db, &provider, ProviderFormat::Iqair, &records)
            .await;
        assert_eq!(stats.validated, 1);
        assert_eq!(stats.saved, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.error_details.len(), 1);

        let logs = error_log::Entity::find().all(&db).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].error_type, "normalization_error");
        assert_eq!(logs[0].source, "IQAir Mock");
    }
}
