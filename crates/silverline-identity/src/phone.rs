//! Phone number normalization.

/// Normalizes a phone number to `+<digits>`.
///
/// Formatting characters are dropped; ten-digit numbers are assumed to be
/// North American. Returns `None` when the result is not 8 to 15 digits.
///
/// ```
/// use silverline_identity::normalize_phone;
/// assert_eq!(normalize_phone("(555) 010-2233").as_deref(), Some("+15550102233"));
/// assert_eq!(normalize_phone("+44 20 7946 0958").as_deref(), Some("+442079460958"));
/// assert_eq!(normalize_phone("call me"), None);
/// ```
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let mut digits = String::with_capacity(trimmed.len());
    for (i, c) in trimmed.chars().enumerate() {
        match c {
            '0'..='9' => digits.push(c),
            '+' if i == 0 => {}
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    if digits.len() == 10 && !trimmed.starts_with('+') {
        digits.insert(0, '1');
    }

    if (8..=15).contains(&digits.len()) {
        Some(format!("+{digits}"))
    } else {
        None
    }
}
