pub mod ansi;
pub mod view;

/// Window of log history requested from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRange {
    /// Last N lines.
    Tail(u32),
    /// Lines since an epoch second, optionally up to another.
    Since { since: i64, until: Option<i64> },
}

/// Selectors offered by the Logs tab, with their labels.
pub const RANGE_OPTIONS: [(&str, &str); 6] = [
    ("100", "Last 100"),
    ("500", "Last 500"),
    ("1000", "Last 1000"),
    ("1h", "Last 1 hour"),
    ("6h", "Last 6 hours"),
    ("24h", "Last 24 hours"),
];

impl LogRange {
    pub fn is_offered(selector: &str) -> bool {
        RANGE_OPTIONS.iter().any(|(value, _)| *value == selector)
    }

    /// Resolves one of the offered selectors (`"500"`, `"6h"`, ...) against
    /// `now` (epoch seconds). Anything else is `None`.
    pub fn parse_selector(selector: &str, now: i64) -> Option<LogRange> {
        let selector = selector.trim();
        if !Self::is_offered(selector) {
            return None;
        }
        if let Some(hours) = selector.strip_suffix('h') {
            let hours: i64 = hours.parse().ok()?;
            let since = hours.checked_mul(3600).and_then(|secs| now.checked_sub(secs))?;
            return Some(LogRange::Since { since, until: None });
        }
        selector.parse::<u32>().ok().map(LogRange::Tail)
    }

    /// Query pairs understood by the logs endpoint.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match *self {
            LogRange::Tail(n) => vec![("tail", n.to_string())],
            LogRange::Since { since, until } => {
                let mut pairs = vec![("since", since.to_string())];
                if let Some(until) = until {
                    pairs.push(("until", until.to_string()));
                }
                pairs
            }
        }
    }
}
