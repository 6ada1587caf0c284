//! printf-style formatting for `printf`, `sprintf`, `OFMT` and `CONVFMT`.

use crate::value::Value;

/// Parsed flags, width and precision of one conversion specification
#[derive(Debug, Default, Clone, Copy)]
struct Spec {
    left_align: bool,
    plus_sign: bool,
    space_sign: bool,
    alternate: bool,
    zero_pad: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Format `args` according to an AWK printf format string.
///
/// Missing arguments behave as uninitialized values, surplus arguments are
/// ignored, unknown conversions are copied through unchanged.
pub fn sprintf(format: &str, args: &[Value], convfmt: &str) -> String {
    let mut result = String::with_capacity(format.len() + 16);
    let mut chars = format.chars().peekable();
    let mut args = args.iter();
    let uninit = Value::Uninitialized;

    while let Some(ch) = chars.next() {
        if ch != '%' {
            result.push(ch);
            continue;
        }

        if chars.peek() == Some(&'%') {
            chars.next();
            result.push('%');
            continue;
        }

        let mut spec = Spec::default();
        let mut raw = String::from("%");

        // Flags
        while let Some(&c) = chars.peek() {
            match c {
                '-' => spec.left_align = true,
                '+' => spec.plus_sign = true,
                ' ' => spec.space_sign = true,
                '#' => spec.alternate = true,
                '0' => spec.zero_pad = true,
                _ => break,
            }
            raw.push(c);
            chars.next();
        }

        // Width
        if chars.peek() == Some(&'*') {
            chars.next();
            raw.push('*');
            let w = args.next().unwrap_or(&uninit).to_number();
            if w < 0.0 {
                spec.left_align = true;
            }
            spec.width = Some(w.abs() as usize);
        } else {
            let mut width = String::new();
            while let Some(&c) = chars.peek() {
                if !c.is_ascii_digit() {
                    break;
                }
                width.push(c);
                raw.push(c);
                chars.next();
            }
            spec.width = width.parse().ok();
        }

        // Precision
        if chars.peek() == Some(&'.') {
            chars.next();
            raw.push('.');
            if chars.peek() == Some(&'*') {
                chars.next();
                raw.push('*');
                let p = args.next().unwrap_or(&uninit).to_number();
                spec.precision = if p < 0.0 { None } else { Some(p as usize) };
            } else {
                let mut precision = String::new();
                while let Some(&c) = chars.peek() {
                    if !c.is_ascii_digit() {
                        break;
                    }
                    precision.push(c);
                    raw.push(c);
                    chars.next();
                }
                spec.precision = Some(precision.parse().unwrap_or(0));
            }
        }

        // C length modifiers carry no meaning here
        while let Some(&c) = chars.peek() {
            if matches!(c, 'h' | 'l' | 'L' | 'q' | 'j' | 'z' | 't') {
                raw.push(c);
                chars.next();
            } else {
                break;
            }
        }

        let Some(conv) = chars.next() else {
            result.push_str(&raw);
            break;
        };

        if !"diouxXcseEfFgG".contains(conv) {
            result.push_str(&raw);
            result.push(conv);
            continue;
        }

        let arg = args.next().unwrap_or(&uninit);
        let formatted = match conv {
            'd' | 'i' => format_signed(arg.to_number(), &spec),
            'o' | 'u' | 'x' | 'X' => format_unsigned(arg.to_number(), conv, &spec),
            'c' => format_char(arg, &spec, convfmt),
            's' => format_str(&arg.to_string_with_format(convfmt), &spec),
            _ => format_float(arg.to_number(), conv, &spec),
        };
        result.push_str(&formatted);
    }

    result
}

/// Convert a number to its string form under `OFMT`/`CONVFMT`.
///
/// Integral values print as integers regardless of the format.
pub fn format_number(n: f64, format: &str) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e16 {
        return (n as i64).to_string();
    }
    if format == "%.6g" {
        return format_float(n, 'g', &Spec { precision: Some(6), ..Spec::default() });
    }
    sprintf(format, &[Value::Number(n)], "%.6g")
}

fn sign_prefix(negative: bool, spec: &Spec) -> &'static str {
    if negative {
        "-"
    } else if spec.plus_sign {
        "+"
    } else if spec.space_sign {
        " "
    } else {
        ""
    }
}

/// Pad `sign` + `body` to the requested width
fn pad_numeric(sign: &str, prefix: &str, body: &str, spec: &Spec, allow_zero: bool) -> String {
    let len = sign.len() + prefix.len() + body.chars().count();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        return format!("{}{}{}", sign, prefix, body);
    }
    let fill = width - len;
    if spec.left_align {
        format!("{}{}{}{}", sign, prefix, body, " ".repeat(fill))
    } else if spec.zero_pad && allow_zero {
        format!("{}{}{}{}", sign, prefix, "0".repeat(fill), body)
    } else {
        format!("{}{}{}{}", " ".repeat(fill), sign, prefix, body)
    }
}

fn pad_text(body: &str, spec: &Spec) -> String {
    let len = body.chars().count();
    match spec.width {
        Some(w) if w > len => {
            if spec.left_align {
                format!("{}{}", body, " ".repeat(w - len))
            } else {
                format!("{}{}", " ".repeat(w - len), body)
            }
        }
        _ => body.to_string(),
    }
}

fn apply_int_precision(mut digits: String, spec: &Spec) -> String {
    if let Some(p) = spec.precision {
        if p == 0 && digits == "0" {
            digits.clear();
        } else if digits.len() < p {
            digits = format!("{}{}", "0".repeat(p - digits.len()), digits);
        }
    }
    digits
}

fn format_signed(n: f64, spec: &Spec) -> String {
    if !n.is_finite() {
        return format_float(n, 'f', spec);
    }
    let v = n.trunc() as i64;
    let digits = apply_int_precision(v.unsigned_abs().to_string(), spec);
    pad_numeric(sign_prefix(v < 0, spec), "", &digits, spec, spec.precision.is_none())
}

fn format_unsigned(n: f64, conv: char, spec: &Spec) -> String {
    let v = if n < 0.0 { (n.trunc() as i64) as u64 } else { n.trunc() as u64 };
    let digits = match conv {
        'o' => format!("{:o}", v),
        'x' => format!("{:x}", v),
        'X' => format!("{:X}", v),
        _ => v.to_string(),
    };
    let mut digits = apply_int_precision(digits, spec);
    let prefix = match conv {
        'x' if spec.alternate && v != 0 => "0x",
        'X' if spec.alternate && v != 0 => "0X",
        _ => "",
    };
    if conv == 'o' && spec.alternate && !digits.starts_with('0') {
        digits.insert(0, '0');
    }
    pad_numeric("", prefix, &digits, spec, spec.precision.is_none())
}

fn format_char(arg: &Value, spec: &Spec, convfmt: &str) -> String {
    let text = match arg {
        Value::Number(n) => char::from_u32(*n as u32).map(String::from).unwrap_or_default(),
        other => other
            .to_string_with_format(convfmt)
            .chars()
            .next()
            .map(String::from)
            .unwrap_or_default(),
    };
    pad_text(&text, spec)
}

fn format_str(s: &str, spec: &Spec) -> String {
    match spec.precision {
        Some(p) => pad_text(&s.chars().take(p).collect::<String>(), spec),
        None => pad_text(s, spec),
    }
}

/// C-style `%e`: at least two exponent digits, explicit exponent sign
fn exponent_form(n: f64, precision: usize, upper: bool) -> String {
    let s = format!("{:.*e}", precision, n);
    let (mantissa, exp) = s.split_once('e').unwrap_or((&s, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}{}{}{:02}", mantissa, e, sign, exp.abs())
}

fn strip_trailing_zeros(s: &str) -> String {
    // only the mantissa is trimmed, the exponent is kept
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    };
    if !mantissa.contains('.') {
        return s.to_string();
    }
    let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", trimmed, exponent)
}

fn format_float(n: f64, conv: char, spec: &Spec) -> String {
    let upper = conv.is_ascii_uppercase();
    if !n.is_finite() {
        let body = if n.is_nan() { "nan" } else { "inf" };
        let body = if upper { body.to_uppercase() } else { body.to_string() };
        return pad_numeric(sign_prefix(n.is_sign_negative(), spec), "", &body, spec, false);
    }

    let negative = n.is_sign_negative() && n != 0.0;
    let magnitude = n.abs();
    let body = match conv {
        'f' | 'F' => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
        'e' | 'E' => exponent_form(magnitude, spec.precision.unwrap_or(6), upper),
        _ => {
            let p = match spec.precision {
                Some(0) => 1,
                Some(p) => p,
                None => 6,
            };
            let exp = if magnitude == 0.0 {
                0
            } else {
                let scientific = format!("{:.*e}", p - 1, magnitude);
                scientific
                    .split_once('e')
                    .and_then(|(_, e)| e.parse::<i32>().ok())
                    .unwrap_or(0)
            };
            let body = if exp < -4 || exp >= p as i32 {
                exponent_form(magnitude, p - 1, upper)
            } else {
                format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, magnitude)
            };
            if spec.alternate {
                body
            } else {
                strip_trailing_zeros(&body)
            }
        }
    };
    pad_numeric(sign_prefix(negative, spec), "", &body, spec, true)
}
