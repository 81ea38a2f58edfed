use serde::{Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    if duration.subsec_millis() == 0 {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    } else {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde::Deserialize;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => parse_duration_string(&s).map_err(Error::custom),
        Value::Number(n) => {
            let secs = n
                .as_u64()
                .ok_or_else(|| Error::custom("negative or fractional duration"))?;
            Ok(Duration::from_secs(secs))
        }
        Value::Object(obj) => {
            let secs = obj
                .get("secs")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| Error::custom("missing 'secs' field"))?;
            let nanos = obj.get("nanos").and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(Duration::new(secs, nanos as u32))
        }
        _ => Err(Error::custom("invalid duration format")),
    }
}

fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }
    if let Some(stripped) = s.strip_suffix("ms") {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_millis(num));
    }
    if let Some(stripped) = s.strip_suffix('s') {
        if !stripped.ends_with('m') && !stripped.ends_with('h') {
            let num: f64 = stripped
                .parse()
                .map_err(|_| format!("invalid number: {stripped}"))?;
            let secs = num.trunc() as u64;
            let nanos = ((num.fract() * 1_000_000_000.0).round()) as u32;
            return Ok(Duration::new(secs, nanos));
        }
    }
    if let Some(stripped) = s.strip_suffix('m') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_secs(num * 60));
    }
    if let Some(stripped) = s.strip_suffix('h') {
        let num: u64 = stripped
            .parse()
            .map_err(|_| format!("invalid number: {stripped}"))?;
        return Ok(Duration::from_secs(num * 3600));
    }
    Err(format!("unknown duration unit: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        d: Duration,
    }

    #[test]
    fn round_trips_seconds_and_millis() {
        let w = Wrapper {
            d: Duration::from_secs(30),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"d":"30s"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.d, Duration::from_secs(30));

        let w = Wrapper {
            d: Duration::from_millis(250),
        };
        let json = serde_json::to_string(&w).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.d, Duration::from_millis(250));
    }

    #[test]
    fn accepts_minutes_hours_and_bare_numbers() {
        let back: Wrapper = serde_json::from_str(r#"{"d":"5m"}"#).unwrap();
        assert_eq!(back.d, Duration::from_secs(300));
        let back: Wrapper = serde_json::from_str(r#"{"d":"2h"}"#).unwrap();
        assert_eq!(back.d, Duration::from_secs(7200));
        let back: Wrapper = serde_json::from_str(r#"{"d":45}"#).unwrap();
        assert_eq!(back.d, Duration::from_secs(45));
    }
}
