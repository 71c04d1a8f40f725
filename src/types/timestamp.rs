//! Microsecond-precision timestamp type, used for created/updated/TTL fields.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self { micros: millis * 1000 }
    }

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch");
        Self { micros: duration.as_micros() as i64 }
    }

    pub fn as_micros(&self) -> i64 {
        self.micros
    }

    pub fn as_millis(&self) -> i64 {
        self.micros / 1000
    }

    pub fn in_range(&self, start: Timestamp, end: Timestamp) -> bool {
        self.micros >= start.micros && self.micros <= end.micros
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}
