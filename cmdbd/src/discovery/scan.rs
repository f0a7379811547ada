use shared::types::SystemFacts;
use crate::store::servers::Observation;

/// Convert scanned system facts to the fields a scan is allowed to overwrite.
///
/// Blank strings count as "not observed". The OS version is cut to at most
/// `os_version_max_chars` characters, keeping the leading part.
pub(crate) fn observe(system: &SystemFacts, os_version_max_chars: usize) -> Observation {
    Observation {
        ip_address: non_blank(&system.ip_address),
        os_type: non_blank(&system.os_type),
        os_version: non_blank(&system.os_version)
            .map(|v| truncate_chars(&v, os_version_max_chars)),
        cpu_cores: system.cpu_cores,
        memory_gb: system.memory_gb,
        disk_gb: system.disk_gb,
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// First `max` characters of `value`, never splitting a UTF-8 sequence.
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((end, _)) => value[..end].to_string(),
        None => value.to_string(),
    }
}
