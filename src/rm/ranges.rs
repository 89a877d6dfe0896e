//! Acknowledgement ranges: compaction of message number sets and expansion
//! back into numbers. Ranges render as `"[1,3][5,5]"` in logs.

use super::headers::AckRange;
use std::collections::BTreeSet;
use std::fmt::Write;

/// Compact `numbers` into sorted, non-overlapping, non-adjacent ranges
pub fn compact<I>(numbers: I) -> Vec<AckRange>
where
    I: IntoIterator<Item = u64>,
{
    let sorted: BTreeSet<u64> = numbers.into_iter().collect();
    let mut ranges: Vec<AckRange> = Vec::new();

    for number in sorted {
        match ranges.last_mut() {
            Some(range) if range.upper.checked_add(1) == Some(number) => range.upper = number,
            _ => ranges.push(AckRange::new(number, number)),
        }
    }
    ranges
}

/// Every number covered by `ranges`, sorted and without duplicates
pub fn expand(ranges: &[AckRange]) -> BTreeSet<u64> {
    ranges
        .iter()
        .filter(|range| range.lower <= range.upper)
        .flat_map(|range| range.lower..=range.upper)
        .collect()
}

pub fn contains(ranges: &[AckRange], number: u64) -> bool {
    ranges.iter().any(|range| range.contains(number))
}

/// Render as `"[lower,upper]..."`
pub fn format_ranges(ranges: &[AckRange]) -> String {
    let mut out = String::new();
    for range in ranges {
        let _ = write!(out, "[{},{}]", range.lower, range.upper);
    }
    out
}

/// Parse the format produced by [`format_ranges`]
pub fn parse_ranges(text: &str) -> Result<Vec<AckRange>, String> {
    let mut ranges = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        let body = rest
            .strip_prefix('[')
            .ok_or_else(|| format!("Expected '[' in ack ranges: {text}"))?;
        let end = body
            .find(']')
            .ok_or_else(|| format!("Unclosed ack range: {text}"))?;
        let (lower, upper) = body[..end]
            .split_once(',')
            .ok_or_else(|| format!("Ack range needs two bounds: {text}"))?;

        let lower: u64 = lower
            .trim()
            .parse()
            .map_err(|e| format!("Invalid lower bound '{lower}': {e}"))?;
        let upper: u64 = upper
            .trim()
            .parse()
            .map_err(|e| format!("Invalid upper bound '{upper}': {e}"))?;
        if lower > upper {
            return Err(format!("Ack range [{lower},{upper}] is inverted"));
        }

        ranges.push(AckRange::new(lower, upper));
        rest = body[end + 1..].trim_start();
    }
    Ok(ranges)
}
