use std::time::{Duration, SystemTime};

/// Absolute time as 100-nanosecond ticks since 1601-01-01 UTC.
///
/// This is the timestamp format of every wire record. The value 0 is
/// used by the host to mean "not set" or "do not change".
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct FileTime(pub u64);

/// Ticks between 1601-01-01 and the start of the UNIX epoch.
const UNIX_EPOCH_TICKS: u64 = 116_444_736_000_000_000;

const TICKS_PER_SEC: u64 = 10_000_000;

impl FileTime {
    pub const UNSET: FileTime = FileTime(0);

    /// The current time.
    pub fn now() -> Self {
        FileTime::from_system_time(SystemTime::now())
    }

    /// Convert a system time. Times that can't be represented are
    /// clamped.
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(since) => FileTime(UNIX_EPOCH_TICKS.saturating_add(duration_to_ticks(since))),
            Err(err) => FileTime(UNIX_EPOCH_TICKS.saturating_sub(duration_to_ticks(err.duration()))),
        }
    }

    pub fn as_system_time(&self) -> SystemTime {
        if self.0 >= UNIX_EPOCH_TICKS {
            SystemTime::UNIX_EPOCH + ticks_to_duration(self.0 - UNIX_EPOCH_TICKS)
        } else {
            SystemTime::UNIX_EPOCH - ticks_to_duration(UNIX_EPOCH_TICKS - self.0)
        }
    }

    pub fn is_unset(&self) -> bool {
        self.0 == 0
    }

    /// Return `None` for the unset time, as the host uses it for "do
    /// not change".
    pub fn to_option(self) -> Option<FileTime> {
        if self.is_unset() { None } else { Some(self) }
    }
}

fn duration_to_ticks(d: Duration) -> u64 {
    d.as_secs()
        .saturating_mul(TICKS_PER_SEC)
        .saturating_add(u64::from(d.subsec_nanos() / 100))
}

fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::new(ticks / TICKS_PER_SEC, ((ticks % TICKS_PER_SEC) * 100) as u32)
}
