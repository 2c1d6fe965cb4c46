//! Phone number canonicalization.
//!
//! Every phone number entering the service is reduced to one canonical key:
//! country code followed by the national number, digits only. The key is
//! what the `users` and `otp_codes` tables store, so two spellings of the
//! same number always collide.

use regex::Regex;

/// Supported country calling code.
const COUNTRY_CODE: &str = "98";
/// National numbers are ten digits and always start with 9 (mobile range).
const NATIONAL_PATTERN: &str = r"^9\d{9}$";

/// Normalize a raw phone input to `<countrycode><national>` digits.
///
/// Accepted shapes for the same number: `+98912…`, `0098912…`, `98912…`,
/// `0912…`, `912…`, with spaces, hyphens, dots, or parentheses anywhere.
/// Idempotent: feeding a canonical key back in returns it unchanged.
/// Returns `None` when the input cannot be a phone number of the supported
/// country.
pub(crate) fn normalize_phone(raw: &str) -> Option<String> {
    let mut digits = String::with_capacity(raw.len());
    let mut seen_plus = false;
    for (index, ch) in raw.trim().chars().enumerate() {
        match ch {
            '0'..='9' => digits.push(ch),
            '+' if index == 0 && !seen_plus => seen_plus = true,
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }

    // Reduce every accepted prefix convention to <countrycode><national>.
    let national = if let Some(rest) = digits.strip_prefix("00") {
        rest.strip_prefix(COUNTRY_CODE)?.to_string()
    } else if seen_plus {
        digits.strip_prefix(COUNTRY_CODE)?.to_string()
    } else if digits.len() == COUNTRY_CODE.len() + 10 {
        digits.strip_prefix(COUNTRY_CODE)?.to_string()
    } else if let Some(rest) = digits.strip_prefix('0') {
        rest.to_string()
    } else {
        digits
    };

    if !valid_national(&national) {
        return None;
    }

    Some(format!("{COUNTRY_CODE}{national}"))
}

fn valid_national(national: &str) -> bool {
    Regex::new(NATIONAL_PATTERN).is_ok_and(|regex| regex.is_match(national))
}
