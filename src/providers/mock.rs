use crate::providers::types::{AirFeed, FeedError};
use async_trait::async_trait;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use rand::Rng;
use serde_json::{json, Value};

/// (城市 key, 显示名, 州/省, 纬度, 经度)
const CITIES: [(&str, &str, &str, f64, f64); 5] = [
    ("bogota", "Bogota", "Bogotá D.C.", 4.6097, -74.0817),
    ("medellin", "Medellin", "Antioquia", 6.2442, -75.5812),
    ("cali", "Cali", "Valle del Cauca", 3.4516, -76.5320),
    ("barranquilla", "Barranquilla", "Atlántico", 10.9639, -74.7964),
    ("cartagena", "Cartagena", "Bolívar", 10.3910, -75.4794),
];

const GOOGLE_POINTS: [(&str, f64, f64); 2] = [("Bogotá", 4.6097, -74.0817), ("Medellín", 6.2442, -75.5812)];

const IQAIR_CITIES: [&str; 3] = ["bogota", "medellin", "cali"];

/// 观测时间取整点，同一小时内重复拉取会命中去重
fn observation_time(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(TimeDelta::hours(1)).unwrap_or(now)
}

fn city(key: &str) -> Option<&'static (&'static str, &'static str, &'static str, f64, f64)> {
    CITIES.iter().find(|c| c.0 == key)
}

fn rand_range(rng: &mut impl Rng, lo: f64, hi: f64) -> f64 {
    (rng.gen_range(lo..hi) * 100.0).round() / 100.0
}

#[derive(Clone, Default)]
pub struct AqicnMock;

impl AqicnMock {
    pub fn payload(&self, city_key: &str, now: DateTime<Utc>) -> Value {
        let mut rng = rand::thread_rng();
        let (name, lat, lon) = city(city_key)
            .map(|c| (c.1, c.3, c.4))
            .unwrap_or(("Unknown", 4.0, -74.0));
        // AQICN 给出站点当地时间（UTC-5）和时区
        let local = observation_time(now) - TimeDelta::hours(5);
        json!({
            "status": "ok",
            "data": {
                "aqi": rng.gen_range(20..180),
                "idx": rng.gen_range(1000..9999),
                "city": { "name": name, "geo": [lat, lon] },
                "time": { "s": local.format("%Y-%m-%d %H:%M:%S").to_string(), "tz": "-05:00" },
                "iaqi": {
                    "pm25": { "v": rand_range(&mut rng, 10.0, 150.0) },
                    "pm10": { "v": rand_range(&mut rng, 20.0, 200.0) },
                    "o3":   { "v": rand_range(&mut rng, 10.0, 100.0) },
                    "no2":  { "v": rand_range(&mut rng, 5.0, 80.0) },
                    "so2":  { "v": rand_range(&mut rng, 2.0, 40.0) },
                    "co":   { "v": rand_range(&mut rng, 0.3, 2.5) }
                }
            }
        })
    }

    pub fn all(&self, now: DateTime<Utc>) -> Vec<Value> {
        CITIES.iter().map(|c| self.payload(c.0, now)).collect()
    }
}

#[async_trait]
impl AirFeed for AqicnMock {
    async fn fetch(&self) -> Result<Vec<Value>, FeedError> {
        Ok(self.all(Utc::now()))
    }
}

#[derive(Clone, Default)]
pub struct GoogleMock;

impl GoogleMock {
    pub fn payload(&self, city: &str, latitude: f64, longitude: f64, now: DateTime<Utc>) -> Value {
        let mut rng = rand::thread_rng();
        let uaqi: i32 = rng.gen_range(20..150);
        json!({
            "dateTime": observation_time(now).to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "regionCode": "CO",
            "indexes": [{
                "code": "uaqi",
                "displayName": "Universal AQI",
                "aqi": uaqi,
                "category": crate::aqi::AqiBand::from_aqi(uaqi).label()
            }],
            "pollutants": [
                { "code": "pm25", "displayName": "PM2.5",
                  "concentration": { "value": rand_range(&mut rng, 10.0, 100.0), "units": "MICROGRAMS_PER_CUBIC_METER" } },
                { "code": "pm10", "displayName": "PM10",
                  "concentration": { "value": rand_range(&mut rng, 20.0, 150.0), "units": "MICROGRAMS_PER_CUBIC_METER" } },
                { "code": "o3", "displayName": "Ozone",
                  "concentration": { "value": rand_range(&mut rng, 20.0, 120.0), "units": "PARTS_PER_BILLION" } },
                { "code": "no2", "displayName": "Nitrogen dioxide",
                  "concentration": { "value": rand_range(&mut rng, 10.0, 80.0), "units": "PARTS_PER_BILLION" } }
            ],
            // 接口本身按坐标查询，这里把请求坐标附在记录上
            "location": { "latitude": latitude, "longitude": longitude, "city": city }
        })
    }
}

#[async_trait]
impl AirFeed for GoogleMock {
    async fn fetch(&self) -> Result<Vec<Value>, FeedError> {
        let now = Utc::now();
        Ok(GOOGLE_POINTS
            .iter()
            .map(|(c, lat, lon)| self.payload(c, *lat, *lon, now))
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct IqairMock;

impl IqairMock {
    pub fn payload(&self, city_key: &str, now: DateTime<Utc>) -> Value {
        let mut rng = rand::thread_rng();
        let (name, state, lat, lon) = city(city_key)
            .map(|c| (c.1, c.2, c.3, c.4))
            .unwrap_or(("Unknown", "Unknown", 4.0, -74.0));
        let aqi: i32 = rng.gen_range(20..180);
        let main = if aqi < 50 {
            ["pm25", "pm10", "o3"][rng.gen_range(0..3)]
        } else if aqi < 100 {
            ["pm25", "pm10"][rng.gen_range(0..2)]
        } else {
            "pm25"
        };
        let ts = observation_time(now).to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        json!({
            "status": "success",
            "data": {
                "city": name,
                "state": state,
                "country": "Colombia",
                "location": { "type": "Point", "coordinates": [lon, lat] },
                "current": {
                    "weather": {
                        "ts": ts,
                        "tp": rng.gen_range(18..32),
                        "pr": rng.gen_range(1010..1020),
                        "hu": rng.gen_range(40..90),
                        "ws": rand_range(&mut rng, 0.5, 5.0),
                        "wd": rng.gen_range(0..360)
                    },
                    "pollution": {
                        "ts": ts,
                        "aqius": aqi,
                        "mainus": main,
                        "aqicn": (aqi as f64 * 0.9) as i32,
                        "maincn": main
                    }
                }
            }
        })
    }
}

#[async_trait]
impl AirFeed for IqairMock {
    async fn fetch(&self) -> Result<Vec<Value>, FeedError> {
        let now = Utc::now();
        Ok(IQAIR_CITIES.iter().map(|c| self.payload(c, now)).collect())
    }
}
