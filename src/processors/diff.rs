//! 절대값 카운터 스냅샷 사이의 차이와 파생 비율 (WAF/WAI)

use std::collections::BTreeMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // "host_writes=123, nand_written=0x1f0" 같은 key=value 쌍
    static ref KEY_VALUE_RE: Regex = Regex::new(r"(?P<key>\w+)=(?P<val>[\w.]+)").unwrap();
}

pub const HOST_WRITES: &str = "host_writes";
pub const NAND_WRITTEN: &str = "nand_written";
pub const NAND_ERASED: &str = "nand_erased";

pub const WEAR_KEYS: [&str; 3] = [HOST_WRITES, NAND_WRITTEN, NAND_ERASED];

/// 이름 붙은 절대 카운터 모음
pub type CounterSnapshot = BTreeMap<String, i64>;

/// 벤더 덤프 텍스트에서 정수 카운터만 추출한다 (10진 또는 0x 16진).
pub fn parse_counter_dump(text: &str) -> CounterSnapshot {
    let mut snapshot = CounterSnapshot::new();
    for caps in KEY_VALUE_RE.captures_iter(text) {
        if let Some(value) = parse_integer(&caps["val"]) {
            snapshot.insert(caps["key"].to_string(), value);
        }
    }
    snapshot
}

fn parse_integer(raw: &str) -> Option<i64> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        raw.parse::<i64>().ok()
    }
}

/// 두 스냅샷 사이의 delta
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffCounters {
    pub deltas: BTreeMap<String, i64>,
}

impl DiffCounters {
    /// `keys`에 든 카운터만 계산한다. 한쪽에 없는 키는 0으로 본다.
    pub fn between(start: &CounterSnapshot, end: &CounterSnapshot, keys: &[&str]) -> Self {
        let deltas = keys
            .iter()
            .map(|key| {
                let before = start.get(*key).copied().unwrap_or(0);
                let after = end.get(*key).copied().unwrap_or(0);
                (key.to_string(), after.saturating_sub(before))
            })
            .collect();
        Self { deltas }
    }

    /// 양쪽 스냅샷에 공통으로 있는 모든 키
    pub fn all(start: &CounterSnapshot, end: &CounterSnapshot) -> Self {
        let keys: Vec<&str> = end
            .keys()
            .filter(|k| start.contains_key(*k))
            .map(String::as_str)
            .collect();
        Self::between(start, end, &keys)
    }

    pub fn get(&self, key: &str) -> i64 {
        self.deltas.get(key).copied().unwrap_or(0)
    }

    /// delta[numerator] / delta[denominator], 소수 둘째 자리 반올림. 분모가 0이면 0.0.
    pub fn ratio(&self, numerator: &str, denominator: &str) -> f64 {
        ratio(self.get(numerator), self.get(denominator))
    }

    pub fn wear(&self) -> WearReport {
        WearReport {
            host_writes: self.get(HOST_WRITES),
            nand_written: self.get(NAND_WRITTEN),
            nand_erased: self.get(NAND_ERASED),
            waf: self.ratio(NAND_WRITTEN, HOST_WRITES),
            wai: self.ratio(NAND_ERASED, HOST_WRITES),
        }
    }
}

pub fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    round2(numerator as f64 / denominator as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 쓰기 증폭 관련 요약
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WearReport {
    pub host_writes: i64,
    pub nand_written: i64,
    pub nand_erased: i64,
    pub waf: f64,
    pub wai: f64,
}

impl WearReport {
    pub fn print(&self) {
        crate::log!("  Host writes : {}", self.host_writes);
        crate::log!("  NAND written: {}", self.nand_written);
        crate::log!("  NAND erased : {}", self.nand_erased);
        crate::log!("  WAF: {:.2}, WAI: {:.2}", self.waf, self.wai);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, i64)]) -> CounterSnapshot {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_parse_counter_dump() {
        let dump = "wai-information: host_writes=1000, nand_written=0x7d0, nand_erased=1500, model=abc.1";
        let parsed = parse_counter_dump(dump);
        assert_eq!(parsed["host_writes"], 1000);
        assert_eq!(parsed["nand_written"], 2000);
        assert_eq!(parsed["nand_erased"], 1500);
        assert!(!parsed.contains_key("model"));
    }

    #[test]
    fn test_wear_ratios() {
        let start = snapshot(&[("host_writes", 100), ("nand_written", 200), ("nand_erased", 50)]);
        let end = snapshot(&[("host_writes", 400), ("nand_written", 1200), ("nand_erased", 150)]);
        let wear = DiffCounters::between(&start, &end, &WEAR_KEYS).wear();
        assert_eq!(wear.host_writes, 300);
        assert_eq!(wear.nand_written, 1000);
        assert_eq!(wear.waf, 3.33);
        assert_eq!(wear.wai, 0.33);
    }

    #[test]
    fn test_zero_denominator_is_zero() {
        let start = snapshot(&[("host_writes", 100), ("nand_written", 500)]);
        let end = snapshot(&[("host_writes", 100), ("nand_written", 900)]);
        let diff = DiffCounters::between(&start, &end, &WEAR_KEYS);
        assert_eq!(diff.ratio(NAND_WRITTEN, HOST_WRITES), 0.0);
        assert_eq!(format!("{:.2}", diff.wear().waf), "0.00");
    }

    #[test]
    fn test_all_common_keys() {
        let start = snapshot(&[("a", 1), ("b", 2)]);
        let end = snapshot(&[("a", 5), ("c", 9)]);
        let diff = DiffCounters::all(&start, &end);
        assert_eq!(diff.deltas.len(), 1);
        assert_eq!(diff.get("a"), 4);
    }
}
