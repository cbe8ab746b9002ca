use rand::Rng;

/// Join codes are six characters drawn from the uppercase alphabet and digits
/// minus `{O, 0, I, 1, L}`, which transcribe ambiguously on a projector.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of a session join code.
pub const CODE_LEN: usize = 6;

/// Generate a random join code. Uniqueness against live sessions is the
/// registry's job; this only guarantees the format.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Whether `code` is a well-formed join code.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN
        && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}
