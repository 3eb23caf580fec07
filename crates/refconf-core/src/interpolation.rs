//! String interpolation
//!
//! Parses templates like:
//! - `"{name}"` - placeholder, replaced by the stringified variable
//! - `"{dropout:.2f}"` - placeholder with a format spec
//! - `"{{literal}}"` - doubled braces are literal braces
//!
//! Format specs follow `[[fill]align][sign][0][width][.precision][type]`
//! with align in `< > ^`, sign in `+ - space` and type in `d f F e E g s %`.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::parser::is_identifier;
use crate::value::Value;

/// A parsed interpolation template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

/// A piece of a template
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Literal text (escaped braces already collapsed)
    Literal(String),
    /// `{name}` or `{name:spec}`
    Placeholder {
        name: String,
        spec: Option<FormatSpec>,
    },
}

impl Template {
    /// Parse a template; `line` is used for error positions
    pub fn parse(input: &str, line: usize) -> Result<Self> {
        TemplateParser::new(input, line).parse()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the template has no placeholders
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Placeholder names in order of appearance
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Render the template, looking placeholder values up through `lookup`
    pub fn render<'v, F>(&self, mut lookup: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<&'v Value>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, spec } => {
                    let value = lookup(name.as_str())?;
                    match spec {
                        Some(spec) => out.push_str(&spec.apply(name, value)?),
                        None => out.push_str(&value.to_string()),
                    }
                }
            }
        }
        Ok(out)
    }
}

struct TemplateParser<'a> {
    input: &'a str,
    pos: usize,
    column: usize,
    line: usize,
}

impl<'a> TemplateParser<'a> {
    fn new(input: &'a str, line: usize) -> Self {
        Self {
            input,
            pos: 0,
            column: 1,
            line,
        }
    }

    fn current(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
            self.column += 1;
        }
    }

    fn error(&self, column: usize, token: &str, message: &str) -> Error {
        Error::syntax(self.line, column, format!("'{}'", token), message)
    }

    fn parse(&mut self) -> Result<Template> {
        let mut segments = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.current() {
            match c {
                '{' if self.peek() == Some('{') => {
                    literal.push('{');
                    self.advance();
                    self.advance();
                }
                '}' if self.peek() == Some('}') => {
                    literal.push('}');
                    self.advance();
                    self.advance();
                }
                '{' => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(self.parse_placeholder()?);
                }
                '}' => {
                    return Err(self.error(
                        self.column,
                        "}",
                        "Single '}' in string; write '}}' for a literal brace",
                    ));
                }
                c => {
                    literal.push(c);
                    self.advance();
                }
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Template { segments })
    }

    fn parse_placeholder(&mut self) -> Result<Segment> {
        let column = self.column;
        self.advance(); // {
        let start = self.pos;

        while let Some(c) = self.current() {
            if c == '}' {
                break;
            }
            self.advance();
        }
        if self.current() != Some('}') {
            return Err(self.error(column, "{", "Unterminated placeholder"));
        }
        let body = &self.input[start..self.pos];
        self.advance(); // }

        let (name, spec) = match body.split_once(':') {
            Some((name, spec)) => (name.trim(), Some(spec)),
            None => (body.trim(), None),
        };

        if !is_identifier(name) {
            return Err(self.error(column, body, "Placeholder must name a variable"));
        }

        let spec = match spec {
            Some(text) => Some(
                FormatSpec::parse(text).ok_or_else(|| {
                    self.error(
                        column,
                        body,
                        &format!(
                            "Invalid format spec (width and precision are limited to {})",
                            MAX_WIDTH
                        ),
                    )
                })?,
            ),
            None => None,
        };

        Ok(Segment::Placeholder {
            name: name.to_string(),
            spec,
        })
    }
}

/// Alignment inside the padded width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    Center,
}

/// Largest width or precision a format spec may request
pub const MAX_WIDTH: usize = 1024;

/// A parsed format spec
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<Align>,
    pub sign: Option<char>,
    pub zero_pad: bool,
    pub width: Option<usize>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

fn spec_regex() -> &'static Regex {
    static SPEC: OnceLock<Regex> = OnceLock::new();
    SPEC.get_or_init(|| {
        Regex::new(
            r"^(?:(?P<fill>.)?(?P<align>[<>^]))?(?P<sign>[+\- ])?(?P<zero>0)?(?P<width>\d+)?(?:\.(?P<precision>\d+))?(?P<kind>[dfFeEgs%])?$",
        )
        .expect("format spec regex is valid")
    })
}

impl FormatSpec {
    /// Parse a spec such as `.2f`, `>8`, `08.3f` or `*^10s`
    ///
    /// Widths and precisions above [`MAX_WIDTH`] are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = spec_regex().captures(text)?;
        let first_char = |name: &str| caps.name(name).and_then(|m| m.as_str().chars().next());
        let bounded = |name: &str| match caps.name(name) {
            Some(m) => match m.as_str().parse::<usize>() {
                Ok(n) if n <= MAX_WIDTH => Ok(Some(n)),
                _ => Err(()),
            },
            None => Ok(None),
        };
        let width = bounded("width").ok()?;
        let precision = bounded("precision").ok()?;

        Some(Self {
            fill: first_char("fill"),
            align: first_char("align").map(|c| match c {
                '<' => Align::Left,
                '^' => Align::Center,
                _ => Align::Right,
            }),
            sign: first_char("sign"),
            zero_pad: caps.name("zero").is_some(),
            width,
            precision,
            kind: first_char("kind"),
        })
    }

    /// Format `value` according to this spec
    pub fn apply(&self, placeholder: &str, value: &Value) -> Result<String> {
        if self.width.max(self.precision).is_some_and(|n| n > MAX_WIDTH) {
            return Err(Error::format(
                placeholder,
                format!("Width and precision are limited to {}", MAX_WIDTH),
            ));
        }
        let numeric = matches!(value, Value::Integer(_) | Value::Float(_));

        let body = match (self.kind, value) {
            (Some('d'), Value::Integer(i)) => self.signed(*i < 0, i.unsigned_abs().to_string()),
            (Some('d'), _) => {
                return Err(Error::format(
                    placeholder,
                    format!("Format code 'd' needs an integer, got {}", value.type_name()),
                ));
            }
            (Some(kind @ ('f' | 'F' | 'e' | 'E' | 'g' | '%')), _) => {
                let Some(n) = value.as_f64() else {
                    return Err(Error::format(
                        placeholder,
                        format!(
                            "Format code '{}' needs a number, got {}",
                            kind,
                            value.type_name()
                        ),
                    ));
                };
                let precision = self.precision.unwrap_or(6);
                let digits = match kind {
                    'f' | 'F' => format!("{:.*}", precision, n.abs()),
                    'e' | 'E' => {
                        let s = exponent_notation(n.abs(), precision);
                        if kind == 'E' {
                            s.to_uppercase()
                        } else {
                            s
                        }
                    }
                    'g' => general_notation(n.abs(), precision),
                    _ => format!("{:.*}%", precision, n.abs() * 100.0),
                };
                self.signed(n.is_sign_negative() && n != 0.0, digits)
            }
            (None, Value::Float(n)) if self.precision.is_some() => {
                let mut digits = general_notation(n.abs(), self.precision.unwrap_or(6));
                // Without a type code a float keeps its fractional part
                if n.is_finite() && !digits.contains(['.', 'e']) {
                    digits.push_str(".0");
                }
                self.signed(n.is_sign_negative() && *n != 0.0, digits)
            }
            (_, Value::Integer(i)) if self.kind.is_none() => {
                self.signed(*i < 0, i.unsigned_abs().to_string())
            }
            (_, Value::Float(n)) if self.kind.is_none() => {
                let repr = Value::Float(n.abs()).to_string();
                self.signed(n.is_sign_negative() && *n != 0.0, repr)
            }
            _ => {
                if self.sign.is_some() {
                    return Err(Error::format(
                        placeholder,
                        format!("Sign not allowed for {}", value.type_name()),
                    ));
                }
                let text = value.to_string();
                match self.precision {
                    Some(p) => text.chars().take(p).collect(),
                    None => text,
                }
            }
        };

        Ok(self.pad(body, numeric && self.kind != Some('s')))
    }

    /// Prefix the sign requested by the format
    fn signed(&self, negative: bool, digits: String) -> String {
        if negative {
            format!("-{}", digits)
        } else {
            match self.sign {
                Some('+') => format!("+{}", digits),
                Some(' ') => format!(" {}", digits),
                _ => digits,
            }
        }
    }

    fn pad(&self, body: String, numeric: bool) -> String {
        let Some(width) = self.width else {
            return body;
        };
        let len = body.chars().count();
        if len >= width {
            return body;
        }
        let missing = width - len;

        // Zero padding goes between the sign and the digits
        if self.zero_pad && self.align.is_none() && numeric {
            let (sign, digits) = match body.chars().next() {
                Some(c @ ('-' | '+' | ' ')) => (c.to_string(), body[1..].to_string()),
                _ => (String::new(), body),
            };
            return format!("{}{}{}", sign, "0".repeat(missing), digits);
        }

        let fill = self
            .fill
            .unwrap_or(if self.zero_pad { '0' } else { ' ' })
            .to_string();
        let align = self
            .align
            .unwrap_or(if numeric { Align::Right } else { Align::Left });

        match align {
            Align::Left => format!("{}{}", body, fill.repeat(missing)),
            Align::Right => format!("{}{}", fill.repeat(missing), body),
            Align::Center => {
                let left = missing / 2;
                format!(
                    "{}{}{}",
                    fill.repeat(left),
                    body,
                    fill.repeat(missing - left)
                )
            }
        }
    }
}

/// `1.5e-3` with a two-digit, signed exponent (`1.50e-03`)
fn exponent_notation(n: f64, precision: usize) -> String {
    let raw = format!("{:.*e}", precision, n);
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => raw,
    }
}

/// General format: fixed or exponent depending on magnitude, trailing
/// zeros removed
fn general_notation(n: f64, precision: usize) -> String {
    let precision = precision.max(1);
    if n == 0.0 {
        return "0".to_string();
    }
    if !n.is_finite() {
        return n.to_string();
    }

    // Exponent after rounding to `precision` significant digits
    let exp = format!("{:.*e}", precision - 1, n)
        .split_once('e')
        .and_then(|(_, exp)| exp.parse::<i64>().ok())
        .unwrap_or(0);
    let precision_i = precision as i64;
    if exp < -4 || exp >= precision_i {
        let s = exponent_notation(n, precision - 1);
        match s.split_once('e') {
            Some((mantissa, exp)) => format!("{}e{}", trim_fraction(mantissa), exp),
            None => s,
        }
    } else {
        let decimals = (precision_i - 1 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, n)).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
