//! Parse Kubernetes resource Quantity strings to numeric values and format
//! recommendations back. CPU is millicores, memory is bytes.

/// Parse CPU quantity string (e.g. "500m", "1") to millicores.
pub fn parse_cpu_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(m) = s.strip_suffix('m') {
        if let Ok(n) = m.parse::<i64>() {
            return Some(n);
        }
    }
    if let Ok(n) = s.parse::<f64>() {
        return Some((n * 1000.0) as i64);
    }
    None
}

/// Parse memory quantity string (e.g. "256Mi", "1Gi") to bytes.
pub fn parse_memory_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace('i', "");
    let (num_str, unit) = if s.ends_with('K') {
        (s.trim_end_matches('K'), 1024_i64)
    } else if s.ends_with('M') {
        (s.trim_end_matches('M'), 1024 * 1024)
    } else if s.ends_with('G') {
        (s.trim_end_matches('G'), 1024 * 1024 * 1024)
    } else if s.ends_with('T') {
        (s.trim_end_matches('T'), 1024_i64 * 1024 * 1024 * 1024)
    } else if s.ends_with('P') {
        (s.trim_end_matches('P'), 1024_i64 * 1024 * 1024 * 1024 * 1024)
    } else if let Ok(n) = s.parse::<i64>() {
        return Some(n);
    } else {
        return None;
    };
    let n: i64 = num_str.parse().ok()?;
    Some(n * unit)
}

/// Format CPU millicores back to a quantity string (e.g. 185 -> "185m", 2000 -> "2").
pub fn format_cpu_millis(millis: i64) -> String {
    if millis % 1000 == 0 {
        format!("{}", millis / 1000)
    } else {
        format!("{}m", millis)
    }
}

/// Format memory bytes back to a quantity string, preferring whole binary units.
pub fn format_memory_bytes(b: i64) -> String {
    const GIB: i64 = 1024 * 1024 * 1024;
    const MIB: i64 = 1024 * 1024;
    const KIB: i64 = 1024;
    if b >= GIB && b % GIB == 0 {
        format!("{}Gi", b / GIB)
    } else if b >= MIB && b % MIB == 0 {
        format!("{}Mi", b / MIB)
    } else if b >= KIB && b % KIB == 0 {
        format!("{}Ki", b / KIB)
    } else {
        format!("{}", b)
    }
}
