/// Values this close to an integer are written without a fractional part.
const INTEGER_TOLERANCE: f64 = 1e-10;
const DECIMAL_PLACES: i32 = 4;

pub fn is_blank(cell: &str) -> bool {
    cell.trim().is_empty()
}

/// Parses a cell as a finite number. `NaN`, `inf` and text are not numeric.
pub fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Canonical rendering for every number written to a table: rounded to four
/// decimals, bare integer when the rounded value is integral, trailing zeros
/// and a dangling decimal point stripped.
pub fn format_number(value: f64) -> String {
    let scale = 10f64.powi(DECIMAL_PLACES);
    let rounded = (value * scale).round() / scale;
    if (rounded - rounded.round()).abs() < INTEGER_TOLERANCE {
        let whole = rounded.round();
        if whole == 0.0 {
            return "0".to_string();
        }
        return format!("{:.0}", whole);
    }
    let formatted = format!("{:.4}", rounded);
    formatted.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Best-effort reformat of a single cell. Blank and non-numeric cells come back unchanged.
pub fn format_cell(cell: &str) -> String {
    match parse_numeric(cell) {
        Some(v) => format_number(v),
        None => cell.to_string(),
    }
}

pub fn format_optional(value: Option<f64>) -> String {
    value.filter(|v| v.is_finite()).map(format_number).unwrap_or_default()
}
