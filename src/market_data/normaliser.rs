// Convert wire strings into internal integer ticks/lots.
// Fixed scales per venue, configured once at startup.

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormaliseError {
    #[error("empty numeric field")]
    Empty,
    #[error("malformed decimal {0:?}")]
    Malformed(String),
    #[error("decimal {0:?} does not fit the configured scale")]
    Overflow(String),
    #[error("negative size {0:?}")]
    NegativeSize(String),
    #[error("decimal {0:?} is finer than the configured scale")]
    Precision(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normaliser {
    pub price_decimals: u32, // e.g. 6 => 1 tick = 0.000001
    pub size_decimals: u32,
}

impl Normaliser {
    pub fn new(price_decimals: u32, size_decimals: u32) -> Self {
        Self { price_decimals, size_decimals }
    }

    pub fn price_to_ticks(&self, s: &str) -> Result<i64, NormaliseError> {
        scaled(s, self.price_decimals)
    }

    pub fn size_to_lots(&self, s: &str) -> Result<u64, NormaliseError> {
        let lots = scaled(s, self.size_decimals)?;
        u64::try_from(lots).map_err(|_| NormaliseError::NegativeSize(s.to_string()))
    }
}

// "123.45" at 4 decimals -> 1_234_500. Trailing zeros past the scale are fine,
// any other extra digit is an error: truncating would merge distinct levels.
fn scaled(s: &str, decimals: u32) -> Result<i64, NormaliseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(NormaliseError::Empty);
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (integer_part, decimal_part) = digits.split_once('.').unwrap_or((digits, ""));
    if integer_part.is_empty() && decimal_part.is_empty() {
        return Err(NormaliseError::Malformed(s.to_string()));
    }
    if !integer_part.chars().chain(decimal_part.chars()).all(|c| c.is_ascii_digit()) {
        return Err(NormaliseError::Malformed(s.to_string()));
    }

    let overflow = || NormaliseError::Overflow(s.to_string());
    let scale = 10i64.checked_pow(decimals).ok_or_else(overflow)?;

    let integer: i64 = if integer_part.is_empty() {
        0
    } else {
        integer_part.parse().map_err(|_| overflow())?
    };

    let width = decimals as usize;
    if decimal_part.len() > width && decimal_part[width..].bytes().any(|b| b != b'0') {
        return Err(NormaliseError::Precision(s.to_string()));
    }
    let fraction: i64 = if width == 0 || decimal_part.is_empty() {
        0
    } else {
        // Pad or truncate decimal part to match our scale
        let padded = format!("{:0<width$}", &decimal_part[..decimal_part.len().min(width)]);
        padded.parse().map_err(|_| overflow())?
    };

    let value = integer
        .checked_mul(scale)
        .and_then(|v| v.checked_add(fraction))
        .ok_or_else(overflow)?;
    Ok(if negative { -value } else { value })
}
