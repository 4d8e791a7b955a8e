//! Number formats carried by `defNumber` elements.
//!
//! INDI number elements declare a printf-style format such as `%8.3f`.  A
//! format ending in `m` is the INDI sexagesimal extension: `%<width>.<frac>m`
//! renders a value as `dd:mm`, `dd:mm.m`, `dd:mm:ss`, `dd:mm:ss.s` or
//! `dd:mm:ss.ss` depending on `frac` (3, 5, 6, 8 or 9).
//!
//! Both parsers accept either notation, so `"12:30"` and `"12.5"` read the
//! same regardless of the declared format.
//!
//! # Example
//!
//! ```rust
//! use indi_core::domain::number_format::NumberFormat;
//!
//! let fmt = NumberFormat::parse("%8.6m").unwrap();
//! let value = fmt.parse_value("12:34:56").unwrap();
//! assert_eq!(fmt.format(value), "12:34:56");
//! ```

use crate::error::FormatError;

/// Precision used when a printf format omits one.
const DEFAULT_PRECISION: usize = 6;

/// A parsed number format.
#[derive(Debug, Clone, PartialEq)]
pub enum NumberFormat {
    Printf(PrintfFormat),
    Sexagesimal(SexagesimalFormat),
}

impl NumberFormat {
    /// Parses a format string.
    ///
    /// `%0.f` and `%.f` are normalised to `%.0f`.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidNumberFormat`] if the format does not
    /// start with `%`, does not end in one of `f e E g G m`, or has an
    /// unsupported sexagesimal fraction length.
    pub fn parse(spec: &str) -> Result<Self, FormatError> {
        let spec = spec.trim();
        let spec = if spec == "%0.f" || spec == "%.f" {
            "%.0f"
        } else {
            spec
        };

        let invalid = || FormatError::InvalidNumberFormat {
            format: spec.to_string(),
        };

        let body = spec.strip_prefix('%').ok_or_else(invalid)?;
        let conversion = body.chars().last().ok_or_else(invalid)?;
        let body = &body[..body.len() - conversion.len_utf8()];

        match conversion {
            'm' => SexagesimalFormat::from_body(body)
                .map(NumberFormat::Sexagesimal)
                .ok_or_else(invalid),
            'f' | 'e' | 'E' | 'g' | 'G' => PrintfFormat::from_body(body, conversion, spec)
                .map(NumberFormat::Printf)
                .ok_or_else(invalid),
            _ => Err(invalid()),
        }
    }

    /// The (normalised) format string.
    pub fn spec(&self) -> String {
        match self {
            NumberFormat::Printf(p) => p.spec.clone(),
            NumberFormat::Sexagesimal(s) => s.spec(),
        }
    }

    /// Renders `value` according to the format.
    pub fn format(&self, value: f64) -> String {
        match self {
            NumberFormat::Printf(p) => p.format(value),
            NumberFormat::Sexagesimal(s) => s.format(value),
        }
    }

    /// Parses a wire value.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError::InvalidNumber`] if the text is neither a
    /// decimal number nor sexagesimal notation.
    pub fn parse_value(&self, text: &str) -> Result<f64, FormatError> {
        match self {
            NumberFormat::Printf(_) => {
                let trimmed = text.trim();
                match trimmed.parse::<f64>() {
                    Ok(v) => Ok(v),
                    Err(_) => parse_sexagesimal(trimmed),
                }
            }
            NumberFormat::Sexagesimal(_) => parse_sexagesimal(text),
        }
    }

    pub fn is_sexagesimal(&self) -> bool {
        matches!(self, NumberFormat::Sexagesimal(_))
    }
}

impl Default for NumberFormat {
    fn default() -> Self {
        NumberFormat::Printf(PrintfFormat {
            spec: "%g".to_string(),
            left_align: false,
            zero_pad: false,
            plus_sign: false,
            space_sign: false,
            width: 0,
            precision: None,
            conversion: 'g',
        })
    }
}

// ── printf ────────────────────────────────────────────────────────────────────

/// A `%[flags][width][.precision]conversion` format for `f e E g G`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrintfFormat {
    spec: String,
    left_align: bool,
    zero_pad: bool,
    plus_sign: bool,
    space_sign: bool,
    width: usize,
    precision: Option<usize>,
    conversion: char,
}

impl PrintfFormat {
    fn from_body(body: &str, conversion: char, spec: &str) -> Option<Self> {
        let mut fmt = PrintfFormat {
            spec: spec.to_string(),
            left_align: false,
            zero_pad: false,
            plus_sign: false,
            space_sign: false,
            width: 0,
            precision: None,
            conversion,
        };

        let mut rest = body;
        while let Some(flag) = rest.chars().next() {
            match flag {
                '-' => fmt.left_align = true,
                '0' => fmt.zero_pad = true,
                '+' => fmt.plus_sign = true,
                ' ' => fmt.space_sign = true,
                // Grouping and alternate forms are accepted but not rendered.
                ',' | '#' | '\'' => {}
                _ => break,
            }
            rest = &rest[1..];
        }

        let (width, precision) = match rest.split_once('.') {
            Some((w, p)) => (w, Some(p)),
            None => (rest, None),
        };
        if !width.is_empty() {
            fmt.width = width.parse().ok()?;
        }
        if let Some(p) = precision {
            fmt.precision = Some(if p.is_empty() { 0 } else { p.parse().ok()? });
        }
        Some(fmt)
    }

    fn format(&self, value: f64) -> String {
        let digits = if !value.is_finite() {
            non_finite(value)
        } else {
            let abs = value.abs();
            let precision = self.precision.unwrap_or(DEFAULT_PRECISION);
            match self.conversion {
                'f' => format!("{abs:.precision$}"),
                'e' => scientific(abs, precision),
                'E' => scientific(abs, precision).to_uppercase(),
                'g' => general(abs, precision),
                _ => general(abs, precision).to_uppercase(),
            }
        };

        let sign = if value < 0.0 {
            "-"
        } else if self.plus_sign {
            "+"
        } else if self.space_sign {
            " "
        } else {
            ""
        };

        let len = sign.len() + digits.len();
        if len >= self.width {
            return format!("{sign}{digits}");
        }
        let pad = self.width - len;
        if self.left_align {
            format!("{sign}{digits}{}", " ".repeat(pad))
        } else if self.zero_pad && value.is_finite() {
            format!("{sign}{}{digits}", "0".repeat(pad))
        } else {
            format!("{}{sign}{digits}", " ".repeat(pad))
        }
    }
}

fn non_finite(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        "Infinity".to_string()
    }
}

/// `%e` rendering: mantissa with `precision` decimals and a signed,
/// at-least-two-digit exponent (`1.500000e+03`).
fn scientific(abs: f64, precision: usize) -> String {
    let raw = format!("{abs:.precision$e}");
    match raw.split_once('e') {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}

/// `%g` rendering: fixed notation when the rounded exponent lies in
/// `[-4, precision)`, scientific otherwise.  Trailing zeros are kept.
fn general(abs: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if abs == 0.0 {
        let decimals = precision - 1;
        return format!("{abs:.decimals$}");
    }
    let rounded = format!("{abs:.prec$e}", prec = precision - 1);
    let exp: i64 = rounded
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if exp >= -4 && exp < precision as i64 {
        let decimals = (precision as i64 - 1 - exp).max(0) as usize;
        format!("{abs:.decimals$}")
    } else {
        scientific(abs, precision - 1)
    }
}

// ── Sexagesimal ───────────────────────────────────────────────────────────────

/// The `%<width>.<frac>m` sexagesimal format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SexagesimalFormat {
    width: usize,
    fraction: u8,
}

impl SexagesimalFormat {
    fn from_body(body: &str) -> Option<Self> {
        let (width, fraction) = body.split_once('.')?;
        let width = if width.is_empty() { 0 } else { width.parse().ok()? };
        let fraction: u8 = fraction.parse().ok()?;
        matches!(fraction, 3 | 5 | 6 | 8 | 9).then_some(SexagesimalFormat { width, fraction })
    }

    fn spec(&self) -> String {
        format!("%{}.{}m", self.width, self.fraction)
    }

    /// Renders `value`, carrying rounded `60`s into the next unit.
    pub fn format(&self, value: f64) -> String {
        let negative = value < 0.0;
        let abs = value.abs();
        let mut whole = abs.trunc() as i64;
        let fractional = (abs - abs.trunc()).abs();

        let body = if self.fraction < 6 {
            let minutes = fractional * 60.0;
            let mut text = self.fixed_minutes(minutes);
            if text.parse::<f64>().map_or(false, |m| m >= 60.0) {
                text = self.fixed_minutes(0.0);
                whole += 1;
            }
            format!("{whole}:{text}")
        } else {
            let mut minutes = (fractional * 60.0).floor();
            let seconds = (fractional - minutes / 60.0) * 3600.0;
            let mut text = self.fixed_seconds(seconds);
            if text.parse::<f64>().map_or(false, |s| s >= 60.0) {
                text = self.fixed_seconds(0.0);
                minutes += 1.0;
                if minutes >= 60.0 {
                    minutes = 0.0;
                    whole += 1;
                }
            }
            format!("{whole}:{minutes:02.0}:{text}")
        };

        let body = if negative { format!("-{body}") } else { body };
        format!("{body:>width$}", width = self.width)
    }

    fn fixed_minutes(&self, minutes: f64) -> String {
        if self.fraction == 5 {
            format!("{minutes:04.1}")
        } else {
            format!("{minutes:02.0}")
        }
    }

    fn fixed_seconds(&self, seconds: f64) -> String {
        match self.fraction {
            8 => format!("{seconds:04.1}"),
            9 => format!("{seconds:05.2}"),
            _ => format!("{seconds:02.0}"),
        }
    }
}

/// Parses `d[:m[:s]]`, where `:`, space and `;` are all accepted separators.
///
/// The sign of the degrees applies to minutes and seconds too, including a
/// negative zero (`"-0:30"` is `-0.5`).
///
/// # Errors
///
/// Returns [`FormatError::InvalidNumber`] for empty input, more than two
/// separators, unparseable components, or negative minutes/seconds.
pub fn parse_sexagesimal(text: &str) -> Result<f64, FormatError> {
    let invalid = || FormatError::InvalidNumber {
        value: text.to_string(),
    };

    let normalised = text.trim().replace([' ', ';'], ":");
    if normalised.is_empty() || normalised.matches(':').count() > 2 {
        return Err(invalid());
    }

    let mut parts: Vec<&str> = normalised.split(':').collect();
    while parts.len() > 1 && parts.last().map_or(false, |p| p.is_empty()) {
        parts.pop();
    }

    let component = |s: &str| s.trim().parse::<f64>().map_err(|_| invalid());
    let degrees = component(parts[0])?;
    let minutes = match parts.get(1) {
        Some(m) => component(m)?,
        None => 0.0,
    };
    let seconds = match parts.get(2) {
        Some(s) => component(s)?,
        None => 0.0,
    };
    if minutes < 0.0 || seconds < 0.0 {
        return Err(invalid());
    }

    let offset = minutes / 60.0 + seconds / 3600.0;
    if degrees.is_sign_negative() {
        Ok(degrees - offset)
    } else {
        Ok(degrees + offset)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
