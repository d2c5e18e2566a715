//! Member expiry
//!
//! An expiry is an absolute point in time, a relative duration, or a
//! signed number of seconds from now. Relative expressions such as
//! `"1 hour 30 minutes"` or `"-5 seconds"` parse via `FromStr`.

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::utils::ClientError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Expiry {
    /// Time-to-live from now
    After(Duration),
    /// Absolute expiry time
    At(SystemTime),
    /// Signed time-to-live in seconds; negative values are already expired
    Seconds(f64),
}

impl Expiry {
    /// Epoch score of this expiry relative to `now` (epoch seconds)
    pub fn score(&self, now: f64) -> f64 {
        match self {
            Expiry::After(ttl) => now + ttl.as_secs_f64(),
            Expiry::Seconds(ttl) => now + ttl,
            Expiry::At(at) => epoch_seconds(*at),
        }
    }
}

/// Seconds since the epoch, negative before it
pub fn epoch_seconds(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

pub fn now() -> f64 {
    epoch_seconds(SystemTime::now())
}

impl From<Duration> for Expiry {
    fn from(ttl: Duration) -> Self {
        Expiry::After(ttl)
    }
}

impl From<SystemTime> for Expiry {
    fn from(at: SystemTime) -> Self {
        Expiry::At(at)
    }
}

impl From<f64> for Expiry {
    fn from(seconds: f64) -> Self {
        Expiry::Seconds(seconds)
    }
}

impl From<i64> for Expiry {
    fn from(seconds: i64) -> Self {
        Expiry::Seconds(seconds as f64)
    }
}

impl From<i32> for Expiry {
    fn from(seconds: i32) -> Self {
        Expiry::Seconds(f64::from(seconds))
    }
}

impl From<u32> for Expiry {
    fn from(seconds: u32) -> Self {
        Expiry::Seconds(f64::from(seconds))
    }
}

fn unit_seconds(unit: &str) -> Option<f64> {
    let seconds = match unit.to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1.0,
        "m" | "min" | "mins" | "minute" | "minutes" => 60.0,
        "h" | "hour" | "hours" => 3600.0,
        "d" | "day" | "days" => 86_400.0,
        "w" | "week" | "weeks" => 604_800.0,
        _ => return None,
    };
    Some(seconds)
}

impl FromStr for Expiry {
    type Err = ClientError;

    /// `"50"`, `"50 seconds"`, `"1 hour 30 minutes"`, `"-5 sec"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidExpiry(s.to_string());
        let tokens: Vec<&str> = s.split_whitespace().collect();

        match tokens.as_slice() {
            [] => Err(invalid()),
            [number] => number
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Expiry::Seconds)
                .ok_or_else(invalid),
            _ if tokens.len() % 2 == 0 => {
                let mut total = 0.0;
                for pair in tokens.chunks(2) {
                    let amount: f64 = pair[0].parse().map_err(|_| invalid())?;
                    let unit = unit_seconds(pair[1]).ok_or_else(invalid)?;
                    if !amount.is_finite() {
                        return Err(invalid());
                    }
                    total += amount * unit;
                }
                Ok(Expiry::Seconds(total))
            }
            _ => Err(invalid()),
        }
    }
}
