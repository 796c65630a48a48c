use std::time::Duration;
#[cfg(not(test))]
use std::time::{SystemTime, UNIX_EPOCH};

#[cfg(test)]
use mock_instant::global::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch, the unit all container
/// timestamps (creation, suspend/resume marks, finish) are recorded in.
/// Tests steer this through the global mock clock.
pub fn epoch_millis() -> u64 {
    unix_duration().as_millis() as u64
}

fn unix_duration() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock set before the Unix epoch")
}
