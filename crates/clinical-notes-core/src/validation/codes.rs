//! Billing code format checks.

use once_cell::sync::Lazy;
use regex::Regex;

// Letter (no U), two characters, optional dotted extension of up to four.
static ICD10: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-TV-Z][0-9][0-9A-Z](\.[0-9A-Z]{1,4})?$").expect("valid ICD-10 regex")
});

// Five digits, or four digits plus a Category II/III suffix.
static CPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{5}|\d{4}[FTU])$").expect("valid CPT regex"));

pub fn is_valid_icd10(code: &str) -> bool {
    ICD10.is_match(code.trim())
}

pub fn is_valid_cpt(code: &str) -> bool {
    CPT.is_match(code.trim())
}

/// First malformed ICD-10 code, if any.
pub fn first_invalid_diagnosis(codes: &[String]) -> Option<&str> {
    codes.iter().map(String::as_str).find(|c| !is_valid_icd10(c))
}

/// First malformed CPT code, if any.
pub fn first_invalid_cpt(codes: &[String]) -> Option<&str> {
    codes.iter().map(String::as_str).find(|c| !is_valid_cpt(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_icd10() {
        for ok in ["F32.9", "F41.1", "Z63.0", "F43.10", "F90"] {
            assert!(is_valid_icd10(ok), "{ok}");
        }
        for bad in ["32.9", "U07.1", "F3", "F32.12345", "depression"] {
            assert!(!is_valid_icd10(bad), "{bad}");
        }
    }

    #[test]
    fn test_cpt() {
        assert!(is_valid_cpt("90834"));
        assert!(is_valid_cpt("0001F"));
        assert!(!is_valid_cpt("9083"));
        assert!(!is_valid_cpt("ABCDE"));
        assert_eq!(
            first_invalid_cpt(&["90837".into(), "12".into()]),
            Some("12")
        );
    }
}
