//! Safe message extraction
//!
//! Renders a record's `%`-style template against its positional arguments
//! without ever failing. Interpolation is attempted first; on failure stray
//! `%` characters are escaped and interpolation is retried; after that the raw
//! arguments are appended to the template; a panic raised while rendering an
//! argument degrades to a literal diagnostic string.

use super::{FormatArg, LogRecord};
use lazy_static::lazy_static;
use regex::Regex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

/// Placeholder that replaces format specifiers in comparison text
pub const GENERIC_PLACEHOLDER: &str = "<*>";

lazy_static! {
    static ref SPECIFIER_PATTERN: Regex =
        Regex::new(r"%[-+ 0#]*\d*(?:\.\d+)?[sdifr]").unwrap();
}

/// Reasons a template cannot be interpolated
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InterpolationError {
    #[error("not enough arguments for format string")]
    NotEnoughArguments,

    #[error("not all arguments converted during string formatting")]
    NotAllConverted,

    #[error("%{conversion} format: a number is required, not {found}")]
    TypeMismatch { conversion: char, found: &'static str },

    #[error("unsupported format character '{0}'")]
    UnsupportedFormat(char),

    #[error("incomplete format")]
    IncompleteFormat,

    #[error("format width or precision exceeds {}", MAX_FIELD_WIDTH)]
    FieldTooLarge,
}

/// Largest width or precision a template may request
pub const MAX_FIELD_WIDTH: usize = 4096;

#[derive(Debug, Default, Clone)]
struct Spec {
    left_align: bool,
    zero_pad: bool,
    plus_sign: bool,
    space_sign: bool,
    alternate: bool,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

const CONVERSIONS: &str = "srdifFeEgxX";

/// Parse a conversion specifier starting right after a `%`; returns it with the index after it
fn parse_spec(chars: &[char], start: usize) -> Result<(Spec, usize), InterpolationError> {
    let mut spec = Spec::default();
    let mut i = start;

    while i < chars.len() {
        match chars[i] {
            '-' => spec.left_align = true,
            '0' => spec.zero_pad = true,
            '+' => spec.plus_sign = true,
            ' ' => spec.space_sign = true,
            '#' => spec.alternate = true,
            _ => break,
        }
        i += 1;
    }

    let (width, next) = parse_field(chars, i)?;
    spec.width = width;
    i = next;

    if i < chars.len() && chars[i] == '.' {
        let (precision, next) = parse_field(chars, i + 1)?;
        spec.precision = Some(precision);
        i = next;
    }

    let conversion = *chars.get(i).ok_or(InterpolationError::IncompleteFormat)?;
    if !CONVERSIONS.contains(conversion) {
        return Err(InterpolationError::UnsupportedFormat(conversion));
    }
    spec.conversion = conversion;
    Ok((spec, i + 1))
}

/// Read a run of digits, rejecting values above [`MAX_FIELD_WIDTH`]
fn parse_field(chars: &[char], start: usize) -> Result<(usize, usize), InterpolationError> {
    let mut value = 0usize;
    let mut i = start;
    while let Some(digit) = chars.get(i).and_then(|c| c.to_digit(10)) {
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add(digit as usize))
            .filter(|v| *v <= MAX_FIELD_WIDTH)
            .ok_or(InterpolationError::FieldTooLarge)?;
        i += 1;
    }
    Ok((value, i))
}

/// Interpolate `template` with `args` using printf-style semantics
pub fn interpolate(template: &str, args: &[FormatArg]) -> Result<String, InterpolationError> {
    let chars: Vec<char> = template.chars().collect();
    let mut output = String::with_capacity(template.len() + args.len() * 8);
    let mut remaining = args.iter();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            output.push(chars[i]);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'%') {
            output.push('%');
            i += 2;
            continue;
        }

        let (spec, next) = parse_spec(&chars, i + 1)?;
        let arg = remaining.next().ok_or(InterpolationError::NotEnoughArguments)?;
        let rendered = render(&spec, arg)?;
        output.push_str(&pad(&spec, rendered));
        i = next;
    }

    if remaining.next().is_some() {
        return Err(InterpolationError::NotAllConverted);
    }
    Ok(output)
}

fn as_integer(spec: &Spec, arg: &FormatArg) -> Result<i64, InterpolationError> {
    match arg {
        FormatArg::Int(value) => Ok(*value),
        FormatArg::Bool(value) => Ok(i64::from(*value)),
        FormatArg::Float(value) if value.is_finite() => Ok(value.trunc() as i64),
        other => Err(InterpolationError::TypeMismatch {
            conversion: spec.conversion,
            found: other.type_name(),
        }),
    }
}

fn as_float(spec: &Spec, arg: &FormatArg) -> Result<f64, InterpolationError> {
    match arg {
        FormatArg::Int(value) => Ok(*value as f64),
        FormatArg::Bool(value) => Ok(if *value { 1.0 } else { 0.0 }),
        FormatArg::Float(value) => Ok(*value),
        other => Err(InterpolationError::TypeMismatch {
            conversion: spec.conversion,
            found: other.type_name(),
        }),
    }
}

fn signed(spec: &Spec, negative: bool, digits: String) -> String {
    if negative {
        format!("-{digits}")
    } else if spec.plus_sign {
        format!("+{digits}")
    } else if spec.space_sign {
        format!(" {digits}")
    } else {
        digits
    }
}

fn exponent_form(value: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, value.abs());
    let (mantissa, exponent) = raw.split_once('e').unwrap_or((raw.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let marker = if upper { 'E' } else { 'e' };
    format!("{mantissa}{marker}{sign}{:02}", exponent.abs())
}

fn render(spec: &Spec, arg: &FormatArg) -> Result<String, InterpolationError> {
    let rendered = match spec.conversion {
        's' => {
            let text = arg.to_str();
            match spec.precision {
                Some(limit) => text.chars().take(limit).collect(),
                None => text,
            }
        }
        'r' => arg.repr(),
        'd' | 'i' => {
            let value = as_integer(spec, arg)?;
            signed(spec, value < 0, value.unsigned_abs().to_string())
        }
        'f' | 'F' => {
            let value = as_float(spec, arg)?;
            let precision = spec.precision.unwrap_or(6);
            signed(spec, value < 0.0, format!("{:.*}", precision, value.abs()))
        }
        'e' | 'E' => {
            let value = as_float(spec, arg)?;
            let precision = spec.precision.unwrap_or(6);
            signed(
                spec,
                value < 0.0,
                exponent_form(value, precision, spec.conversion == 'E'),
            )
        }
        'g' => {
            let value = as_float(spec, arg)?;
            FormatArg::Float(value).to_str()
        }
        'x' | 'X' => {
            let value = as_integer(spec, arg)?;
            let mut digits = format!("{:x}", value.unsigned_abs());
            if spec.conversion == 'X' {
                digits = digits.to_uppercase();
            }
            if spec.alternate {
                digits = format!("0{}{}", spec.conversion, digits);
            }
            signed(spec, value < 0, digits)
        }
        other => return Err(InterpolationError::UnsupportedFormat(other)),
    };
    Ok(rendered)
}

fn pad(spec: &Spec, rendered: String) -> String {
    let length = rendered.chars().count();
    if length >= spec.width {
        return rendered;
    }
    let fill = spec.width - length;
    let numeric = !matches!(spec.conversion, 's' | 'r');

    if spec.left_align {
        format!("{rendered}{}", " ".repeat(fill))
    } else if spec.zero_pad && numeric {
        let (sign, digits) = match rendered.chars().next() {
            Some(c @ ('-' | '+' | ' ')) => (c.to_string(), rendered[1..].to_string()),
            _ => (String::new(), rendered),
        };
        format!("{sign}{}{digits}", "0".repeat(fill))
    } else {
        format!("{}{rendered}", " ".repeat(fill))
    }
}

/// Escape every `%` that does not start a plausible conversion spec
///
/// A `%` followed by a space is treated as literal text ("50% done").
pub fn escape_stray_percents(template: &str) -> String {
    let chars: Vec<char> = template.chars().collect();
    let mut escaped = String::with_capacity(template.len() + 4);
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '%' {
            escaped.push(chars[i]);
            i += 1;
            continue;
        }
        if chars.get(i + 1) == Some(&'%') {
            escaped.push_str("%%");
            i += 2;
            continue;
        }
        match parse_spec(&chars, i + 1) {
            Ok((spec, next)) if !spec.space_sign => {
                escaped.extend(&chars[i..next]);
                i = next;
            }
            _ => {
                escaped.push_str("%%");
                i += 1;
            }
        }
    }
    escaped
}

enum Extraction {
    Formatted(String),
    Recovered(String),
    Failed(String),
}

impl Extraction {
    fn into_message(self) -> String {
        match self {
            Extraction::Formatted(text) | Extraction::Recovered(text) | Extraction::Failed(text) => {
                text
            }
        }
    }
}

/// Text carried by a panic payload
pub fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn recover(template: &str, args: &[FormatArg]) -> Extraction {
    if let Ok(text) = interpolate(template, args) {
        return Extraction::Formatted(text);
    }

    let escaped = escape_stray_percents(template);
    if escaped != template {
        if let Ok(text) = interpolate(&escaped, args) {
            return Extraction::Recovered(text);
        }
    }

    let rendered: Vec<String> = args.iter().map(FormatArg::repr).collect();
    Extraction::Recovered(format!(
        "[UNFORMATTED] {} | args: ({})",
        template,
        rendered.join(", ")
    ))
}

fn extract(record: &LogRecord) -> Extraction {
    if record.args.is_empty() {
        return Extraction::Formatted(record.msg.clone());
    }

    match panic::catch_unwind(AssertUnwindSafe(|| recover(&record.msg, &record.args))) {
        Ok(extraction) => extraction,
        Err(payload) => Extraction::Failed(format!(
            "[FORMATTING_ERROR] panic: {} | {}",
            panic_detail(payload.as_ref()),
            record.msg
        )),
    }
}

/// Render the record's message; never panics and never fails
pub fn safe_get_message(record: &LogRecord) -> String {
    extract(record).into_message()
}

/// Replace `%s`/`%d`/`%f`-style specifiers with [`GENERIC_PLACEHOLDER`]
pub fn normalize_specifiers(text: &str) -> String {
    SPECIFIER_PATTERN
        .replace_all(text, GENERIC_PLACEHOLDER)
        .into_owned()
}

/// Message text used for similarity comparison
///
/// Records whose arguments could not be interpolated compare on their
/// normalized template so the appended raw arguments do not skew similarity.
pub fn safe_get_message_for_comparison(record: &LogRecord) -> String {
    match extract(record) {
        Extraction::Formatted(text) => normalize_specifiers(&text),
        Extraction::Recovered(_) | Extraction::Failed(_) => normalize_specifiers(&record.msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LogLevel;
    use std::fmt;

    fn record(msg: &str, args: Vec<FormatArg>) -> LogRecord {
        LogRecord::new(LogLevel::Info, "test", msg).with_args(args)
    }

    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_standard_interpolation() {
        let rec = record(
            "Loaded %s rows in %.2f s (%d%%)",
            vec!["120".into(), 1.5.into(), 80.into()],
        );
        assert_eq!(safe_get_message(&rec), "Loaded 120 rows in 1.50 s (80%)");
    }

    #[test]
    fn test_oversized_width_and_precision_fall_back() {
        assert_eq!(
            interpolate("value %50000000s", &["x".into()]),
            Err(InterpolationError::FieldTooLarge)
        );
        assert_eq!(
            interpolate("value %.99999999999999999999999f", &[1.5.into()]),
            Err(InterpolationError::FieldTooLarge)
        );

        let rec = record("value %50000000s", vec!["x".into()]);
        let message = safe_get_message(&rec);
        assert!(message.starts_with("[UNFORMATTED] value %50000000s"), "{message}");
        assert!(message.len() < 100);

        let rec = record("value %4096s", vec!["x".into()]);
        assert_eq!(safe_get_message(&rec).len(), "value ".len() + MAX_FIELD_WIDTH);
    }

    #[test]
    fn test_no_args_returns_template_verbatim() {
        let rec = record("100% complete %s", vec![]);
        assert_eq!(safe_get_message(&rec), "100% complete %s");
    }

    #[test]
    fn test_missing_args_recovers() {
        let rec = record("Values %s and %s", vec!["a".into()]);
        let message = safe_get_message(&rec);
        assert!(message.starts_with("[UNFORMATTED]"));
        assert!(message.contains("'a'"));
    }

    #[test]
    fn test_extra_args_recovers() {
        let rec = record("Only %s", vec!["a".into(), "b".into()]);
        let message = safe_get_message(&rec);
        assert!(message.contains("Only %s"));
        assert!(message.contains("'b'"));
    }

    #[test]
    fn test_type_mismatch_recovers() {
        let rec = record("Count %d", vec!["many".into()]);
        assert!(safe_get_message(&rec).contains("'many'"));
    }

    #[test]
    fn test_none_and_unicode_args() {
        let rec = record("Value: %s, name: %s", vec![FormatArg::None, "Å→β".into()]);
        assert_eq!(safe_get_message(&rec), "Value: None, name: Å→β");

        let rec = record("Count %d", vec![FormatArg::None]);
        assert!(safe_get_message(&rec).contains("None"));
    }

    #[test]
    fn test_stray_percent_is_escaped() {
        let rec = record("Progress 50% done for %s", vec!["fit".into()]);
        assert_eq!(safe_get_message(&rec), "Progress 50% done for fit");
    }

    #[test]
    fn test_broken_display_falls_back_to_diagnostic() {
        let rec = record("Model %s", vec![FormatArg::display(Broken)]);
        let message = safe_get_message(&rec);
        assert!(message.starts_with("[FORMATTING_ERROR]"));
        assert!(message.contains("Model %s"));
    }

    #[test]
    fn test_padding_and_numeric_forms() {
        let args = vec![FormatArg::Int(7), FormatArg::Int(255), FormatArg::Float(1500.0)];
        assert_eq!(
            interpolate("[%03d] %#x %.1e", &args).unwrap(),
            "[007] 0xff 1.5e+03"
        );
        assert_eq!(
            interpolate("%-5s|", &["ab".into()]).unwrap(),
            "ab   |"
        );
    }

    #[test]
    fn test_comparison_variant_normalizes_specifiers() {
        let malformed = record("Processing %s of %d", vec!["x".into()]);
        assert_eq!(
            safe_get_message_for_comparison(&malformed),
            "Processing <*> of <*>"
        );

        let fine = record("Processing %s", vec!["x".into()]);
        assert_eq!(safe_get_message_for_comparison(&fine), "Processing x");
    }
}
