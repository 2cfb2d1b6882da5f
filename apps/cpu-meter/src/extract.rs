use std::fmt;

/// CPU busy percentage in `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsagePercent(u8);

impl UsagePercent {
    pub fn from_idle(idle: f64) -> Option<Self> {
        if !idle.is_finite() || !(0.0..=100.0).contains(&idle) {
            return None;
        }
        Some(Self((100.0 - idle).round_ties_even() as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for UsagePercent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parses a dstat CSV row whose third column is CPU idle and returns the busy share.
///
/// Accepts rows shaped like `usr,sys,idle,<anything>`: the first two columns must be
/// non-empty, the idle column may only hold digits and dots, and at least one more
/// column must follow. Header rows and anything else yield `None`.
pub fn extract_cpu_usage(line: &str) -> Option<UsagePercent> {
    let mut fields = line.splitn(4, ',');
    let first = fields.next()?;
    let second = fields.next()?;
    let idle = fields.next()?;
    // A trailing column (possibly empty) must exist after idle.
    fields.next()?;

    if first.is_empty() || second.is_empty() || idle.is_empty() {
        return None;
    }
    if !idle.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }

    let idle = idle.parse::<f64>().ok()?;
    UsagePercent::from_idle(idle)
}
