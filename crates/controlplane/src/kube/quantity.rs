//! Parsing of Kubernetes resource quantities (`500m`, `2`, `1Gi`, `512M`).

/// Binary suffixes are checked before decimal ones so `Mi` never matches `M`.
const MEMORY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
    ("m", 1e-3),
];

/// CPU quantity in millicores.
pub fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis.parse::<u64>().ok();
    }
    let cores: f64 = quantity.parse().ok()?;
    (cores >= 0.0).then(|| (cores * 1000.0).round() as u64)
}

/// Memory quantity in bytes.
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    let (number, multiplier) = MEMORY_SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| quantity.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((quantity, 1.0));

    let value: f64 = number.parse().ok()?;
    (value >= 0.0).then(|| (value * multiplier).round() as u64)
}
