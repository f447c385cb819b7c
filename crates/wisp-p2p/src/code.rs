//! Sharing codes: `LLLL-DDDD`, letters drawn from a 24-character alphabet
//! that excludes the visually ambiguous `I` and `O`.

use rand::RngCore;

const ALPHABET: &[u8; 24] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";

/// Generate a fresh sharing code using the OS CSPRNG (`rand::rngs::OsRng`
/// transitively via `rand::thread_rng`, which is itself seeded from the OS
/// source — never from wall-clock time).
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut letters = [0u8; 4];
    for l in letters.iter_mut() {
        *l = ALPHABET[(rng.next_u32() as usize) % ALPHABET.len()];
    }
    let digits: u32 = rng.next_u32() % 10_000;
    format!(
        "{}-{:04}",
        std::str::from_utf8(&letters).unwrap(),
        digits
    )
}

/// Validate a user-entered sharing code against `^[A-Z]{4}-\d{4}$`,
/// after trimming whitespace and upper-casing.
pub fn normalize_and_validate(input: &str) -> Option<String> {
    let normalized = input.trim().to_ascii_uppercase();
    if is_valid(&normalized) {
        Some(normalized)
    } else {
        None
    }
}

fn is_valid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 9 {
        return false;
    }
    if bytes[4] != b'-' {
        return false;
    }
    bytes[0..4].iter().all(|b| ALPHABET.contains(b))
        && bytes[5..9].iter().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..200 {
            let code = generate_code();
            assert!(normalize_and_validate(&code).is_some(), "{code} should validate");
            // never contains the ambiguous letters
            assert!(!code.contains('I') && !code.contains('O'));
        }
    }

    #[test]
    fn accepts_canonical_form() {
        assert_eq!(normalize_and_validate("AAAA-0000").as_deref(), Some("AAAA-0000"));
    }

    #[test]
    fn normalizes_lowercase_and_whitespace() {
        assert_eq!(
            normalize_and_validate("  aaaa-0000  ").as_deref(),
            Some("AAAA-0000")
        );
    }

    #[test]
    fn rejects_forbidden_letters() {
        // I and O are excluded from the sharing-code alphabet.
        assert!(normalize_and_validate("IOOO-0000").is_none());
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(normalize_and_validate("AAA-0000").is_none());
        assert!(normalize_and_validate("AAAA0000").is_none());
        assert!(normalize_and_validate("AAAA-000").is_none());
        assert!(normalize_and_validate("AAAA-00000").is_none());
        assert!(normalize_and_validate("").is_none());
    }
}
