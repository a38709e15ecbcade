//! Memory/disk spec-string parsing and ship-data directory layout, ported
//! from the original's `drivers/core/utils.py`.

use std::path::{Path, PathBuf};

use tracing::warn;

pub const MIN_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
pub const MIN_DISK_BYTES: u64 = 100 * 1024 * 1024;

fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit.to_ascii_lowercase().as_str() {
        "" => Some(1),
        "k" => Some(1024),
        "m" => Some(1024 * 1024),
        "g" => Some(1024 * 1024 * 1024),
        "kb" => Some(1024),
        "mb" => Some(1024 * 1024),
        "gb" => Some(1024 * 1024 * 1024),
        "ki" => Some(1024),
        "mi" => Some(1024 * 1024),
        "gi" => Some(1024 * 1024 * 1024),
        _ => None,
    }
}

/// Parses a memory/disk spec string like `"512m"`, `"2Gi"`, `"100000"` into a
/// byte count. A bare trailing unit letter is treated Docker-style (`m` =
/// mebibyte, binary) exactly like the `Mi` suffix, not as the Kubernetes
/// milli-unit — only the Kubernetes orchestrator driver re-renders its own
/// `Mi`/`Gi` suffixes before handing a quantity to the API.
pub fn parse_memory_string(spec: &str) -> Result<u64, String> {
    let spec = spec.trim();
    let split_at = spec.find(|c: char| !c.is_ascii_digit()).unwrap_or(spec.len());
    let (digits, unit) = spec.split_at(split_at);
    if digits.is_empty() {
        return Err(format!("invalid memory spec '{spec}': no numeric portion"));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid memory spec '{spec}': not a number"))?;
    let multiplier = unit_multiplier(unit)
        .ok_or_else(|| format!("invalid memory spec '{spec}': unknown unit '{unit}'"))?;
    Ok(value * multiplier)
}

pub fn parse_disk_string(spec: &str) -> Result<u64, String> {
    parse_memory_string(spec)
}

/// Parses and floors to [`MIN_MEMORY_BYTES`], warning (not failing) when the
/// requested amount was rounded up.
pub fn parse_and_enforce_minimum_memory(spec: &str) -> u64 {
    enforce_minimum(spec, MIN_MEMORY_BYTES, "memory")
}

pub fn parse_and_enforce_minimum_disk(spec: &str) -> u64 {
    enforce_minimum(spec, MIN_DISK_BYTES, "disk")
}

fn enforce_minimum(spec: &str, floor: u64, kind: &str) -> u64 {
    let requested = match parse_memory_string(spec) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to parse {kind} spec '{spec}' ({e}), using floor of {floor} bytes");
            return floor;
        }
    };
    if requested < floor {
        warn!(
            "requested {kind} {requested} bytes below minimum {floor} bytes, rounding up"
        );
        floor
    } else {
        requested
    }
}

/// Docker-style suffix -> Kubernetes binary-unit suffix. `m` is the critical
/// one: Docker's bare `m` means mebibyte, Kubernetes' bare `m` means
/// milli-bytes, so it must never reach the Kubernetes API unconverted.
fn docker_to_k8s_suffix(unit: &str) -> Option<&'static str> {
    match unit.to_ascii_lowercase().as_str() {
        "k" | "kb" => Some("Ki"),
        "m" | "mb" => Some("Mi"),
        "g" | "gb" => Some("Gi"),
        _ => None,
    }
}

/// Normalizes a Docker-style spec string to something safe to hand to the
/// Kubernetes API as a resource quantity: enforces `floor` first (returning
/// a raw byte count if the request was too small), otherwise rewrites the
/// trailing unit to its `Ki`/`Mi`/`Gi` equivalent.
fn normalize_for_k8s(spec: &str, floor: u64, kind: &str) -> String {
    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return trimmed.to_string();
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.ends_with("ki") || lower.ends_with("mi") || lower.ends_with("gi") {
        return trimmed.to_string();
    }
    let requested = match parse_memory_string(trimmed) {
        Ok(bytes) => bytes,
        Err(_) => return trimmed.to_string(),
    };
    if requested < floor {
        warn!("requested {kind} '{trimmed}' below minimum {floor} bytes, using floor");
        return floor.to_string();
    }
    let split_at = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split_at);
    match docker_to_k8s_suffix(unit) {
        Some(k8s_unit) => format!("{digits}{k8s_unit}"),
        None => trimmed.to_string(),
    }
}

pub fn normalize_memory_for_k8s(memory: &str) -> String {
    normalize_for_k8s(memory, MIN_MEMORY_BYTES, "memory")
}

pub fn normalize_disk_for_k8s(disk: &str) -> String {
    normalize_for_k8s(disk, MIN_DISK_BYTES, "disk")
}

pub struct ShipDirs {
    pub home: PathBuf,
    pub metadata: PathBuf,
}

/// Creates `{ship_data_dir}/{ship_id}/home` and `/metadata`, world-writable
/// (0o777) so the ship's container, running as an arbitrary uid, can write
/// into its bind mount.
pub fn ensure_ship_dirs(ship_data_dir: &Path, ship_id: &str) -> std::io::Result<ShipDirs> {
    let base = ship_data_dir.join(ship_id);
    let home = base.join("home");
    let metadata = base.join("metadata");
    std::fs::create_dir_all(&home)?;
    std::fs::create_dir_all(&metadata)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&home, std::fs::Permissions::from_mode(0o777))?;
        std::fs::set_permissions(&metadata, std::fs::Permissions::from_mode(0o777))?;
    }
    Ok(ShipDirs { home, metadata })
}

pub fn ship_data_exists(ship_data_dir: &Path, ship_id: &str) -> bool {
    let base = ship_data_dir.join(ship_id);
    base.join("home").is_dir() && base.join("metadata").is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_and_decimal_suffixes() {
        assert_eq!(parse_memory_string("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_string("2Gi").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_string("100000").unwrap(), 100_000);
        assert_eq!(parse_memory_string("1ki").unwrap(), 1024);
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_memory_string("5xb").is_err());
    }

    #[test]
    fn enforces_memory_floor() {
        assert_eq!(parse_and_enforce_minimum_memory("1m"), MIN_MEMORY_BYTES);
        assert_eq!(parse_and_enforce_minimum_memory("256Mi"), 256 * 1024 * 1024);
    }

    #[test]
    fn enforces_disk_floor() {
        assert_eq!(parse_and_enforce_minimum_disk("1m"), MIN_DISK_BYTES);
    }

    #[test]
    fn normalizes_docker_style_m_suffix_to_mi_for_k8s() {
        assert_eq!(normalize_memory_for_k8s("512m"), "512Mi");
        assert_eq!(normalize_memory_for_k8s("1g"), "1Gi");
        assert_eq!(normalize_memory_for_k8s("256Mi"), "256Mi");
    }

    #[test]
    fn normalize_clamps_tiny_memory_to_raw_byte_floor() {
        assert_eq!(normalize_memory_for_k8s("1m"), MIN_MEMORY_BYTES.to_string());
    }

    #[test]
    fn ship_dirs_created_and_detected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!ship_data_exists(tmp.path(), "s1"));
        ensure_ship_dirs(tmp.path(), "s1").unwrap();
        assert!(ship_data_exists(tmp.path(), "s1"));
    }
}
