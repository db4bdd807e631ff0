use chrono::{DateTime, Utc};

use crate::models::docker::Port;

pub fn human_bytes(b: u64) -> String {
    if b == 0 {
        return "0 B".to_string();
    }
    const UNIT: u64 = 1024;
    if b < UNIT {
        return format!("{} B", b);
    }
    let suffixes = ["KB", "MB", "GB", "TB"];
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = b / UNIT;
    while n >= UNIT && exp < suffixes.len() - 1 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}", b as f64 / div as f64, suffixes[exp])
}

/// Single-unit uptime since `created` (epoch seconds): `42s`, `5m`, `3h`, `2d`.
pub fn uptime(created: i64, now: i64) -> String {
    let secs = (now - created).max(0);
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

pub fn started_on(created: i64) -> String {
    match DateTime::<Utc>::from_timestamp(created, 0) {
        Some(t) => t.format("%b %e, %Y, %H:%M").to_string(),
        None => String::new(),
    }
}

/// `public:private` (or `:private` when unpublished), duplicates removed.
/// Docker lists a published port once per address family.
pub fn port_labels(ports: &[Port]) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for p in ports {
        let label = match p.public_port {
            Some(public) => format!("{}:{}", public, p.private_port),
            None => format!(":{}", p.private_port),
        };
        if !labels.contains(&label) {
            labels.push(label);
        }
    }
    labels
}

pub fn state_class(state: &str) -> &'static str {
    match state {
        "running" => "badge-success",
        "paused" | "restarting" => "badge-warning",
        "exited" | "dead" => "badge-error",
        _ => "badge-info",
    }
}
