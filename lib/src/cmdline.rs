//! Kernel command-line helpers.
//!
//! The command line is a whitespace separated list of `key=value` tokens.
//! Subsystems pull their own keys out of it; unknown keys are ignored and a
//! malformed value leaves the subsystem default in place.

/// Value of the last `key=value` token for `key`.
pub fn cmdline_value<'a>(cmdline: &'a str, key: &str) -> Option<&'a str> {
    cmdline
        .split_whitespace()
        .filter_map(|token| token.strip_prefix(key)?.strip_prefix('='))
        .last()
}

pub fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("on")
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("enabled")
        || value == "1"
    {
        Some(true)
    } else if value.eq_ignore_ascii_case("off")
        || value.eq_ignore_ascii_case("false")
        || value.eq_ignore_ascii_case("no")
        || value.eq_ignore_ascii_case("disabled")
        || value == "0"
    {
        Some(false)
    } else {
        None
    }
}

/// Decimal or `0x` hexadecimal u32.
pub fn parse_u32(value: &str) -> Option<u32> {
    match value.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse::<u32>().ok(),
    }
}

/// Byte count with an optional `K`, `M` or `G` suffix (powers of 1024).
pub fn parse_size(value: &str) -> Option<u64> {
    let (digits, shift) = match value.as_bytes().last()? {
        b'k' | b'K' => (&value[..value.len() - 1], 10),
        b'm' | b'M' => (&value[..value.len() - 1], 20),
        b'g' | b'G' => (&value[..value.len() - 1], 30),
        _ => (value, 0),
    };
    let base = digits.parse::<u64>().ok()?;
    base.checked_mul(1u64 << shift)
}
