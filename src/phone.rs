//! Phone number canonicalisation and carrier detection.
//!
//! Numbers are normalised to the 11-digit local form (`0803…`). Detection is
//! prefix-table driven; an unknown prefix yields `None` and the orchestrator
//! turns that into a validation error rather than guessing a carrier.

use crate::vendors::types::Network;

const MTN_PREFIXES: &[&str] = &[
    "0803", "0806", "0703", "0706", "0813", "0816", "0810", "0814", "0903", "0906", "0913",
    "0916", "0704",
];
const GLO_PREFIXES: &[&str] = &["0805", "0807", "0705", "0815", "0811", "0905", "0915"];
const AIRTEL_PREFIXES: &[&str] = &[
    "0802", "0808", "0708", "0812", "0701", "0902", "0901", "0904", "0907", "0912", "0911",
];
const NINE_MOBILE_PREFIXES: &[&str] = &["0809", "0818", "0817", "0909", "0908"];

/// Canonicalise a Nigerian MSISDN to `0XXXXXXXXXX`.
///
/// Accepts `+234…`, `234…` and local `0…` forms, tolerating spaces and
/// dashes. Anything else is rejected.
pub fn normalize(raw: &str) -> Result<String, String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    let digits = cleaned.strip_prefix('+').unwrap_or(&cleaned);
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("phone number contains invalid characters: {}", raw));
    }

    let local = if let Some(rest) = digits.strip_prefix("234") {
        format!("0{}", rest)
    } else {
        digits.to_string()
    };

    if local.len() != 11 || !local.starts_with('0') {
        return Err(format!("phone number is not a valid local number: {}", raw));
    }

    Ok(local)
}

/// Detect the carrier from a canonical 11-digit number.
pub fn detect_network(phone: &str) -> Option<Network> {
    if phone.len() != 11 {
        return None;
    }
    let prefix = &phone[..4];
    if MTN_PREFIXES.contains(&prefix) {
        Some(Network::Mtn)
    } else if GLO_PREFIXES.contains(&prefix) {
        Some(Network::Glo)
    } else if AIRTEL_PREFIXES.contains(&prefix) {
        Some(Network::Airtel)
    } else if NINE_MOBILE_PREFIXES.contains(&prefix) {
        Some(Network::NineMobile)
    } else {
        None
    }
}

/// Mask a phone number for display and logs: `0803****567`.
pub fn mask(phone: &str) -> String {
    if phone.len() < 8 {
        return "*".repeat(phone.len());
    }
    format!(
        "{}****{}",
        &phone[..4],
        &phone[phone.len() - 3..]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_international_forms() {
        assert_eq!(normalize("+2348031234567").unwrap(), "08031234567");
        assert_eq!(normalize("2348031234567").unwrap(), "08031234567");
        assert_eq!(normalize("0803 123 4567").unwrap(), "08031234567");
        assert_eq!(normalize("0803-123-4567").unwrap(), "08031234567");
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(normalize("12345").is_err());
        assert!(normalize("080312345678").is_err());
        assert!(normalize("0803123456a").is_err());
        assert!(normalize("8031234567").is_err());
    }

    #[test]
    fn detects_carriers_by_prefix() {
        assert_eq!(detect_network("08031234567"), Some(Network::Mtn));
        assert_eq!(detect_network("08051234567"), Some(Network::Glo));
        assert_eq!(detect_network("08021234567"), Some(Network::Airtel));
        assert_eq!(detect_network("08091234567"), Some(Network::NineMobile));
        assert_eq!(detect_network("07991234567"), None);
    }

    #[test]
    fn masks_for_display() {
        assert_eq!(mask("08031234567"), "0803****567");
        assert_eq!(mask("0803"), "****");
    }
}
