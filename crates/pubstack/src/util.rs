// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Parsers for the human-readable duration and size strings used in configuration.

use std::time::Duration;

/// Parses a duration made of one or more `<number><unit>` segments.
///
/// Supported units are `ns`, `us`, `ms`, `s`, `m` and `h`. Numbers may carry a
/// fractional part. The bare string `"0"` is accepted as a zero duration.
///
/// # Examples
///
/// ```
/// use pubstack::util::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
/// assert_eq!(parse_duration("1h30m"), Some(Duration::from_secs(5400)));
/// assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
/// assert_eq!(parse_duration("15"), None);
/// ```
pub fn parse_duration(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if trimmed == "0" {
        return Some(Duration::ZERO);
    }
    if trimmed.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let number_len = rest
            .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|ch: char| ch.is_ascii_digit() || ch == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1f64,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += number * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(total as u64))
}

/// Parses a human-readable byte size such as `"2MB"`, `"512KiB"` or `"1500"`.
///
/// Decimal suffixes (`K`, `KB`, `M`, `MB`, `G`, `GB`) use powers of 1000 and
/// binary suffixes (`KiB`, `MiB`, `GiB`) powers of 1024. Suffixes are case
/// insensitive and may be separated from the number by whitespace.
///
/// # Examples
///
/// ```
/// use pubstack::util::parse_byte_size;
///
/// assert_eq!(parse_byte_size("2MB"), Some(2_000_000));
/// assert_eq!(parse_byte_size("512KiB"), Some(524_288));
/// assert_eq!(parse_byte_size("1500"), Some(1500));
/// assert_eq!(parse_byte_size("two megs"), None);
/// ```
pub fn parse_byte_size(value: &str) -> Option<u64> {
    let trimmed = value.trim();
    let number_len = trimmed
        .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
        .unwrap_or(trimmed.len());
    if number_len == 0 {
        return None;
    }
    let number: f64 = trimmed[..number_len].parse().ok()?;

    let multiplier = match trimmed[number_len..].trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1f64,
        "k" | "kb" => 1e3,
        "m" | "mb" => 1e6,
        "g" | "gb" => 1e9,
        "kib" => 1024f64,
        "mib" => 1024f64 * 1024f64,
        "gib" => 1024f64 * 1024f64 * 1024f64,
        _ => return None,
    };

    let bytes = number * multiplier;
    if !bytes.is_finite() || bytes > u64::MAX as f64 {
        return None;
    }
    Some(bytes as u64)
}
