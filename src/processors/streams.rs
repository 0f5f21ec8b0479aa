use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::log;

/// NVMe write 스트림별 (건수, 길이 합)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCounter {
    pub count: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    streams: BTreeMap<u32, StreamCounter>,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stream: u32, length: u64) {
        let counter = self.streams.entry(stream).or_default();
        counter.count += 1;
        counter.length += length;
    }

    pub fn total(&self) -> StreamCounter {
        self.streams
            .values()
            .fold(StreamCounter::default(), |acc, c| StreamCounter {
                count: acc.count + c.count,
                length: acc.length + c.length,
            })
    }

    pub fn get(&self, stream: u32) -> StreamCounter {
        self.streams.get(&stream).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn print(&self) {
        let total = self.total();
        log!(" Write count: {}, written data: {}", total.count, total.length);
        for (stream, counter) in &self.streams {
            log!(" stream {} counts {} written {}", stream, counter.count, counter.length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_totals() {
        let mut stats = StreamStats::new();
        stats.add(0, 8);
        stats.add(2, 16);
        stats.add(2, 8);
        assert_eq!(stats.get(2), StreamCounter { count: 2, length: 24 });
        assert_eq!(stats.total(), StreamCounter { count: 3, length: 32 });
        assert_eq!(stats.get(7), StreamCounter::default());
    }
}
