//! Parser for deployment profile files.
//!
//! A profile is a list of `key = value` entries, one per line. Blank lines
//! are skipped and `#` starts a comment that runs to the end of the line.
//!
//! ```text
//! # ASE run of the line-copy function
//! afu_id           = 9f1a3c5e-0d2b-4e6f-8a7c-1b3d5f7e9a0c
//! target           = simulated
//! input_lines      = 5
//! poll_interval_us = 1002500
//! drain_delays     = 2
//! timeout_ms       = 0        # wait forever
//! output_unit      = lines
//! ```

use crate::Profile;
use afu_common::AfuId;
use anyhow::{Context, Result, anyhow, bail};
use nom::{Finish, IResult};
use nom::bytes::complete::{is_not, take_while_m_n, take_while1};
use nom::character::complete::{char, digit1, space0};
use nom::combinator::{all_consuming, map_res, opt};
use nom::sequence::{delimited, preceded, separated_pair, tuple};
use std::time::Duration;

fn key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn value(input: &str) -> IResult<&str, &str> {
    is_not("\r\n")(input)
}

/// `key = value` with optional whitespace around the `=`.
fn entry(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(key, delimited(space0, char('='), space0), value)(input)
}

fn number(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse::<u64>)(input)
}

fn hex_digits(len: usize, input: &str) -> IResult<&str, &str> {
    take_while_m_n(len, len, |c: char| c.is_ascii_hexdigit())(input)
}

fn hex4(input: &str) -> IResult<&str, &str> {
    hex_digits(4, input)
}

fn hex8(input: &str) -> IResult<&str, &str> {
    hex_digits(8, input)
}

fn hex12(input: &str) -> IResult<&str, &str> {
    hex_digits(12, input)
}

/// Canonical 8-4-4-4-12 UUID text.
fn uuid(input: &str) -> IResult<&str, (&str, &str, &str, &str, &str)> {
    tuple((
        hex8,
        preceded(char('-'), hex4),
        preceded(char('-'), hex4),
        preceded(char('-'), hex4),
        preceded(char('-'), hex12),
    ))(input)
}

/// Parses an accelerator function id in canonical UUID form.
///
/// Case-insensitive; surrounding whitespace is ignored.
pub fn parse_afu_id(text: &str) -> Result<AfuId> {
    let (_, groups) = all_consuming(uuid)(text.trim())
        .finish()
        .map_err(|e| anyhow!("Invalid AFU id {text:?}: {:?}", e.code))?;

    let (a, b, c, d, e) = groups;
    let digits: Vec<u8> = [a, b, c, d, e].concat().into_bytes();
    let mut bytes = [0u8; 16];
    for (byte, pair) in bytes.iter_mut().zip(digits.chunks_exact(2)) {
        let pair = std::str::from_utf8(pair)?;
        *byte = u8::from_str_radix(pair, 16)?;
    }
    Ok(AfuId(bytes))
}

fn parse_number(text: &str) -> Result<u64> {
    let (_, n) = all_consuming(number)(text)
        .finish()
        .map_err(|_| anyhow!("expected a non-negative integer, found {text:?}"))?;
    Ok(n)
}

/// Removes the trailing comment, if any.
fn strip_comment(line: &str) -> &str {
    let parsed: IResult<&str, Option<&str>> = opt(is_not("#"))(line);
    match parsed {
        Ok((_, Some(content))) => content,
        _ => "",
    }
}

fn apply_entry(profile: &mut Profile, key: &str, value: &str) -> Result<()> {
    match key {
        "afu_id" => profile.afu_id = Some(parse_afu_id(value)?),
        "target" => profile.target = Some(value.parse()?),
        "input_lines" => profile.input_lines = Some(usize::try_from(parse_number(value)?)?),
        "poll_interval_us" => {
            profile.poll_interval = Some(Duration::from_micros(parse_number(value)?));
        }
        "drain_delays" => profile.drain_delays = Some(u32::try_from(parse_number(value)?)?),
        "timeout_ms" => {
            let ms = parse_number(value)?;
            profile.timeout = Some((ms > 0).then(|| Duration::from_millis(ms)));
        }
        "output_unit" => profile.output_unit = Some(value.parse()?),
        other => bail!("unknown key {other:?}"),
    }
    Ok(())
}

/// Parses profile text.
///
/// Later entries for the same key win. Errors carry the 1-based line
/// number of the offending entry.
pub fn parse_profile(text: &str) -> Result<Profile> {
    let mut profile = Profile::default();

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }

        let (_, (key, value)) = all_consuming(entry)(line)
            .finish()
            .map_err(|_| anyhow!("line {line_no}: expected `key = value`, found {line:?}"))?;
        apply_entry(&mut profile, key, value.trim())
            .with_context(|| format!("line {line_no}: invalid value for `{key}`"))?;
    }

    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use afu_core::device::Target;
    use afu_core::verify::OutputUnit;

    #[test]
    fn line_copy_id_round_trips_through_text() {
        let text = AfuId::LINE_COPY.to_string();
        assert_eq!(parse_afu_id(&text).unwrap(), AfuId::LINE_COPY);
        assert_eq!(parse_afu_id(&text.to_uppercase()).unwrap(), AfuId::LINE_COPY);
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(parse_afu_id("").is_err());
        assert!(parse_afu_id("9f1a3c5e0d2b4e6f8a7c1b3d5f7e9a0c").is_err());
        assert!(parse_afu_id("9f1a3c5e-0d2b-4e6f-8a7c-1b3d5f7e9a0").is_err());
        assert!(parse_afu_id("zf1a3c5e-0d2b-4e6f-8a7c-1b3d5f7e9a0c").is_err());
    }

    #[test]
    fn full_profile() {
        let text = "\
# hardware run
afu_id = 00112233-4455-6677-8899-aabbccddeeff
target = physical
input_lines = 64

poll_interval_us=2500   # fast poll
drain_delays = 3
timeout_ms = 500
output_unit = bytes
";
        let profile = parse_profile(text).unwrap();
        assert_eq!(
            profile.afu_id,
            Some(AfuId([
                0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff,
            ]))
        );
        assert_eq!(profile.target, Some(Target::Physical));
        assert_eq!(profile.input_lines, Some(64));
        assert_eq!(profile.poll_interval, Some(Duration::from_micros(2500)));
        assert_eq!(profile.drain_delays, Some(3));
        assert_eq!(profile.timeout, Some(Some(Duration::from_millis(500))));
        assert_eq!(profile.output_unit, Some(OutputUnit::Bytes));
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let profile = parse_profile("timeout_ms = 0").unwrap();
        assert_eq!(profile.timeout, Some(None));
    }

    #[test]
    fn empty_text_is_an_empty_profile() {
        assert_eq!(parse_profile("\n  # nothing\n\n").unwrap(), Profile::default());
    }

    #[test]
    fn unknown_key_reports_its_line() {
        let err = parse_profile("input_lines = 5\nlines = 6\n").unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("line 2"), "{message}");
        assert!(message.contains("unknown key"), "{message}");
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(parse_profile("input_lines = -1").is_err());
        assert!(parse_profile("input_lines = five").is_err());
        assert!(parse_profile("target = fpga").is_err());
        assert!(parse_profile("output_unit = words").is_err());
        assert!(parse_profile("just some words").is_err());
    }

    #[test]
    fn later_entries_win() {
        let profile = parse_profile("drain_delays = 1\ndrain_delays = 4").unwrap();
        assert_eq!(profile.drain_delays, Some(4));
    }
}
