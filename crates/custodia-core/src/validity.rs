//! 有效期描述
//!
//! 以 `"365d"`、`"10y"` 这样的字符串配置，按近似时长比较。

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use time::{Duration, OffsetDateTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidityUnit {
    Hour,
    Day,
    Week,
    Year,
}

impl ValidityUnit {
    fn suffix(&self) -> char {
        match self {
            ValidityUnit::Hour => 'h',
            ValidityUnit::Day => 'd',
            ValidityUnit::Week => 'w',
            ValidityUnit::Year => 'y',
        }
    }

    /// 单位折算的小时数（年按 365 天计）
    fn hours(&self) -> u64 {
        match self {
            ValidityUnit::Hour => 1,
            ValidityUnit::Day => 24,
            ValidityUnit::Week => 7 * 24,
            ValidityUnit::Year => 365 * 24,
        }
    }
}

/// 一段有效期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    count: u32,
    unit: ValidityUnit,
}

impl Validity {
    pub fn new(count: u32, unit: ValidityUnit) -> Self {
        Self { count, unit }
    }

    pub fn days(count: u32) -> Self {
        Self::new(count, ValidityUnit::Day)
    }

    pub fn years(count: u32) -> Self {
        Self::new(count, ValidityUnit::Year)
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> ValidityUnit {
        self.unit
    }

    fn total_hours(&self) -> u64 {
        self.count as u64 * self.unit.hours()
    }

    /// 把有效期加到时间点上
    pub fn add_to(&self, t: OffsetDateTime) -> OffsetDateTime {
        t + Duration::hours(self.total_hours() as i64)
    }
}

impl PartialOrd for Validity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Validity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_hours().cmp(&other.total_hours())
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Validity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 2 {
            return Err(format!("invalid validity '{}'", s));
        }

        let (num, suffix) = s.split_at(s.len() - 1);
        let unit = match suffix.chars().next().unwrap().to_ascii_lowercase() {
            'h' => ValidityUnit::Hour,
            'd' => ValidityUnit::Day,
            'w' => ValidityUnit::Week,
            'y' => ValidityUnit::Year,
            c => return Err(format!("unknown validity unit '{}'", c)),
        };

        let count: u32 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid validity count '{}'", num))?;
        if count == 0 {
            return Err("validity must be positive".to_string());
        }

        Ok(Self { count, unit })
    }
}

impl Serialize for Validity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Validity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("365d".parse::<Validity>().unwrap(), Validity::days(365));
        assert_eq!("10Y".parse::<Validity>().unwrap(), Validity::years(10));
        assert_eq!(
            "36h".parse::<Validity>().unwrap(),
            Validity::new(36, ValidityUnit::Hour)
        );
        assert!("".parse::<Validity>().is_err());
        assert!("0d".parse::<Validity>().is_err());
        assert!("5x".parse::<Validity>().is_err());
        assert!("d".parse::<Validity>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(Validity::days(366) > Validity::years(1));
        assert!(Validity::days(365) == Validity::years(1));
        assert!(Validity::new(2, ValidityUnit::Week) > Validity::days(13));
    }

    #[test]
    fn test_add_to() {
        let t0 = datetime!(2025-06-01 00:00:00 UTC);
        assert_eq!(Validity::days(365).add_to(t0), datetime!(2026-06-01 00:00:00 UTC));
    }

    #[test]
    fn test_serde_round_trip() {
        let v: Validity = serde_json::from_str("\"90d\"").unwrap();
        assert_eq!(v, Validity::days(90));
        assert_eq!(serde_json::to_string(&v).unwrap(), "\"90d\"");
    }
}
