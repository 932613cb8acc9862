use regex::Regex;
use std::sync::OnceLock;

fn mobile_wallet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\+92|92|0)3[0-9]{9}$").expect("static regex"))
}

fn iban_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^PK[0-9]{2}[A-Z]{4}[0-9]{16}$").expect("static regex"))
}

// Validate a Pakistani mobile wallet number (JazzCash / Easypaisa: 03xxxxxxxxx or +923xxxxxxxxx)
pub fn is_valid_mobile_wallet(number: &str) -> bool {
    mobile_wallet_regex().is_match(number)
}

// Normalise a mobile wallet number to the local 03xxxxxxxxx form
pub fn normalize_mobile_wallet(number: &str) -> Option<String> {
    let trimmed = number.trim().replace([' ', '-'], "");
    if !is_valid_mobile_wallet(&trimmed) {
        return None;
    }

    let local = if let Some(rest) = trimmed.strip_prefix("+92") {
        format!("0{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("92") {
        format!("0{}", rest)
    } else {
        trimmed
    };

    Some(local)
}

// Validate a Pakistani IBAN (24 characters, PKkk BBBB 16 digits)
pub fn is_valid_iban(iban: &str) -> bool {
    let compact: String = iban.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_uppercase();
    iban_regex().is_match(&compact)
}

// Validate an account title (letters, spaces, dots; 3-100 chars)
pub fn is_valid_account_title(title: &str) -> bool {
    let trimmed = title.trim();
    (3..=100).contains(&trimmed.chars().count())
        && trimmed.chars().all(|c| c.is_alphabetic() || c == ' ' || c == '.')
}

// Sanitize string to prevent XSS when echoed back
pub fn sanitize_html(input: &str) -> String {
    input
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
