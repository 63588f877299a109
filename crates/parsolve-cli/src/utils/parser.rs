use parsolve::core::problem::ConeSpec;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error(
        "Invalid cone '{0}'. Expected 'free', 'non-negative', or 'box:LOWER,UPPER' (e.g., 'box:0,1')."
    )]
    InvalidCone(String),

    #[error("Invalid bound '{value}' in cone '{name}': expected a finite number.")]
    InvalidBound { name: String, value: String },

    #[error("Invalid assignment '{0}'. Expected KEY=VALUE.")]
    InvalidAssignment(String),
}

/// Parses the command-line spelling of a constraint set.
///
/// Bound ordering is left to [`ConeSpec::validate`], which the solver runs at setup.
pub fn parse_cone(name: &str) -> Result<ConeSpec, ParseError> {
    let trimmed = name.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "free" | "none" => return Ok(ConeSpec::Free),
        "non-negative" | "nonneg" | "nn" => return Ok(ConeSpec::NonNegative),
        _ => {}
    }

    let Some(bounds) = trimmed.strip_prefix("box:") else {
        return Err(ParseError::InvalidCone(name.to_string()));
    };
    let Some((lower, upper)) = bounds.split_once(',') else {
        return Err(ParseError::InvalidCone(name.to_string()));
    };
    let bound = |value: &str| -> Result<f64, ParseError> {
        value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ParseError::InvalidBound {
                name: name.to_string(),
                value: value.trim().to_string(),
            })
    };
    Ok(ConeSpec::Box {
        lower: bound(lower)?,
        upper: bound(upper)?,
    })
}

/// Splits a `-S KEY=VALUE` argument. Both sides are trimmed; the key must be non-empty.
pub fn parse_assignment(pair: &str) -> Result<(&str, &str), ParseError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value.trim())),
        _ => Err(ParseError::InvalidAssignment(pair.to_string())),
    }
}
