// src/cardgen.rs
//
// Synthetic test card generation: brand-aware BIN handling, Luhn check
// digit, expiry and CVV synthesis, and track string assembly. Pure
// functions over a thread-local RNG; nothing here touches the transport.

use chrono::Datelike;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Payment card brands the generator knows prefixes for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Brand {
    Visa,
    Mastercard,
    Amex,
    Diners,
}

impl Brand {
    pub fn label(self) -> &'static str {
        match self {
            Brand::Visa => "Visa",
            Brand::Mastercard => "Mastercard",
            Brand::Amex => "American Express",
            Brand::Diners => "Diners Club",
        }
    }

    /// Standard issuer prefixes for the brand.
    fn prefixes(self) -> &'static [&'static str] {
        match self {
            Brand::Visa => &["4"],
            Brand::Mastercard => &[
                "51", "52", "53", "54", "55", "22", "23", "24", "25", "26", "27",
            ],
            Brand::Amex => &["34", "37"],
            Brand::Diners => &["36", "38", "39"],
        }
    }

    /// Full card number length including the check digit.
    pub fn number_length(self) -> usize {
        match self {
            Brand::Amex => 15,
            Brand::Diners => 14,
            _ => 16,
        }
    }

    fn cvv_length(self) -> usize {
        match self {
            Brand::Amex => 4,
            _ => 3,
        }
    }

    /// Whether a BIN starts with one of the brand's standard prefixes.
    pub fn matches_bin(self, bin: &str) -> bool {
        self.prefixes().iter().any(|p| bin.starts_with(p))
    }
}

/// A generated test card. Immutable once produced; track strings are
/// re-derived on demand rather than cached.
#[derive(Clone, Debug, Serialize)]
pub struct GeneratedCard {
    pub brand: Brand,
    pub number: String,
    /// Expiry as two-digit year followed by two-digit month (YYMM).
    pub expiry: String,
    pub cvv: String,
}

impl GeneratedCard {
    /// Track 1: `%B<number>^<holder>^<YYMM><serviceCode>?`
    pub fn track1(&self, holder: &str, service_code: &str) -> String {
        format!(
            "%B{}^{}^{}{}?",
            self.number, holder, self.expiry, service_code
        )
    }

    /// Track 2: `;<number>=<YYMM><serviceCode>?`
    pub fn track2(&self, service_code: &str) -> String {
        format!(";{}={}{}?", self.number, self.expiry, service_code)
    }
}

/// Validate a caller-supplied BIN: exactly six ASCII digits.
pub fn validate_bin(bin: &str) -> Result<(), Error> {
    if bin.len() != 6 || !bin.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::local("BIN must be exactly 6 digits"));
    }
    Ok(())
}

/// Warning text when a BIN does not match its brand's standard prefixes.
/// Proceeding is the caller's choice; the generator never enforces this.
pub fn bin_warning(brand: Brand, bin: &str) -> Option<String> {
    if brand.matches_bin(bin) {
        return None;
    }
    let expected = match brand {
        Brand::Visa => "4",
        Brand::Mastercard => "51-55 or 22-27",
        Brand::Amex => "34 or 37",
        Brand::Diners => "36, 38 or 39",
    };
    Some(format!(
        "{} numbers normally start with {}",
        brand.label(),
        expected
    ))
}

/// Compute the Luhn check digit for a number missing its final digit.
///
/// Digits are walked from least significant; every digit at an even index
/// (0-based from the right) is doubled, with 9 subtracted when the doubling
/// exceeds 9.
pub fn luhn_check_digit(number: &str) -> Result<u8, Error> {
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::local("card number must contain only digits"));
    }
    let mut total = 0u32;
    for (i, c) in number.chars().rev().enumerate() {
        let mut n = c.to_digit(10).unwrap_or(0);
        if i % 2 == 0 {
            n *= 2;
            if n > 9 {
                n -= 9;
            }
        }
        total += n;
    }
    Ok(((10 - total % 10) % 10) as u8)
}

/// Whether a full card number (check digit included) passes the Luhn check.
pub fn luhn_valid(number: &str) -> bool {
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let mut total = 0u32;
    for (i, c) in number.chars().rev().enumerate() {
        let mut n = c.to_digit(10).unwrap_or(0);
        if i % 2 == 1 {
            n *= 2;
            if n > 9 {
                n -= 9;
            }
        }
        total += n;
    }
    total % 10 == 0
}

/// Generate a test card for the brand.
///
/// With a BIN the first six digits are fixed (the BIN is validated for
/// shape only — use [`bin_warning`] for the brand-prefix check); without
/// one a standard prefix is chosen at random.
pub fn generate(brand: Brand, bin: Option<&str>) -> Result<GeneratedCard, Error> {
    let mut rng = rand::thread_rng();

    let prefix = match bin {
        Some(bin) => {
            validate_bin(bin)?;
            bin.to_string()
        }
        None => {
            let prefixes = brand.prefixes();
            prefixes[rng.gen_range(0..prefixes.len())].to_string()
        }
    };

    let length = brand.number_length();
    let mut number = prefix;
    while number.len() < length - 1 {
        number.push(char::from(b'0' + rng.gen_range(0..10u8)));
    }
    let check = luhn_check_digit(&number)?;
    number.push(char::from(b'0' + check));

    Ok(GeneratedCard {
        brand,
        number,
        expiry: generate_expiry(&mut rng),
        cvv: generate_cvv(brand, &mut rng),
    })
}

/// Expiry date uniformly between 1 and 5 years from today, encoded YYMM.
fn generate_expiry(rng: &mut impl Rng) -> String {
    let days = rng.gen_range(365..=365 * 5);
    let date = chrono::Local::now().date_naive() + chrono::Duration::days(days);
    format!("{:02}{:02}", date.year() % 100, date.month())
}

fn generate_cvv(brand: Brand, rng: &mut impl Rng) -> String {
    (0..brand.cvv_length())
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRANDS: [Brand; 4] = [Brand::Visa, Brand::Mastercard, Brand::Amex, Brand::Diners];

    #[test]
    fn test_luhn_check_digit_known_value() {
        // The well-known Visa test number 4111111111111111.
        assert_eq!(luhn_check_digit("411111111111111").unwrap(), 1);
        assert!(luhn_valid("4111111111111111"));
        assert!(!luhn_valid("4111111111111112"));
    }

    #[test]
    fn test_luhn_rejects_non_digits() {
        assert!(luhn_check_digit("41x1").is_err());
        assert!(luhn_check_digit("").is_err());
        assert!(!luhn_valid("41x1"));
    }

    #[test]
    fn test_generated_numbers_pass_luhn() {
        for brand in BRANDS {
            for _ in 0..50 {
                let card = generate(brand, None).unwrap();
                assert!(
                    luhn_valid(&card.number),
                    "{} failed Luhn for {:?}",
                    card.number,
                    brand
                );
            }
        }
    }

    #[test]
    fn test_length_invariants() {
        for brand in BRANDS {
            let card = generate(brand, None).unwrap();
            assert_eq!(card.number.len(), brand.number_length());
        }
        assert_eq!(Brand::Amex.number_length(), 15);
        assert_eq!(Brand::Diners.number_length(), 14);
        assert_eq!(Brand::Visa.number_length(), 16);
        assert_eq!(Brand::Mastercard.number_length(), 16);
    }

    #[test]
    fn test_brand_prefixes_respected() {
        for brand in BRANDS {
            let card = generate(brand, None).unwrap();
            assert!(
                brand.matches_bin(&card.number),
                "{} has no {:?} prefix",
                card.number,
                brand
            );
        }
    }

    #[test]
    fn test_bin_roundtrip() {
        let card = generate(Brand::Visa, Some("412345")).unwrap();
        assert_eq!(&card.number[..6], "412345");
        assert_eq!(card.number.len(), 16);
        assert!(luhn_valid(&card.number));
    }

    #[test]
    fn test_invalid_bin_rejected() {
        assert!(matches!(
            generate(Brand::Visa, Some("12345")),
            Err(Error::LocalValidation(_))
        ));
        assert!(matches!(
            generate(Brand::Visa, Some("12345a")),
            Err(Error::LocalValidation(_))
        ));
    }

    #[test]
    fn test_bin_warning_only_on_mismatch() {
        assert!(bin_warning(Brand::Visa, "412345").is_none());
        assert!(bin_warning(Brand::Visa, "512345").is_some());
        assert!(bin_warning(Brand::Mastercard, "222100").is_none());
        assert!(bin_warning(Brand::Amex, "341234").is_none());
        assert!(bin_warning(Brand::Diners, "361234").is_none());
        // A mismatched BIN still generates — the warning is advisory.
        let card = generate(Brand::Visa, Some("512345")).unwrap();
        assert_eq!(&card.number[..6], "512345");
    }

    #[test]
    fn test_cvv_widths() {
        assert_eq!(generate(Brand::Amex, None).unwrap().cvv.len(), 4);
        assert_eq!(generate(Brand::Visa, None).unwrap().cvv.len(), 3);
        assert!(generate(Brand::Visa, None)
            .unwrap()
            .cvv
            .chars()
            .all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_expiry_is_yymm_in_the_future() {
        for _ in 0..20 {
            let card = generate(Brand::Visa, None).unwrap();
            assert_eq!(card.expiry.len(), 4);
            let month: u32 = card.expiry[2..].parse().unwrap();
            assert!((1..=12).contains(&month));
        }
    }

    #[test]
    fn test_track_assembly() {
        let card = GeneratedCard {
            brand: Brand::Visa,
            number: "4111111111111111".to_string(),
            expiry: "2807".to_string(),
            cvv: "123".to_string(),
        };
        assert_eq!(
            card.track1("TEST/CARDHOLDER", "101"),
            "%B4111111111111111^TEST/CARDHOLDER^2807101?"
        );
        assert_eq!(card.track2("101"), ";4111111111111111=2807101?");
    }
}
