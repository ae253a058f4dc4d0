use rand::RngCore;
use rand::rngs::OsRng;

/// Salted credential digest: `hash(password, salt) -> hex digest`.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    encode_hex(hasher.finalize().as_bytes())
}

/// Fresh per-credential salt.
pub fn generate_salt() -> String {
    OsRng.next_u64().to_string()
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes.iter() {
        output.push(nibble(byte >> 4));
        output.push(nibble(byte & 0x0f));
    }
    output
}

fn nibble(value: u8) -> char {
    match value {
        0..=9 => char::from(b'0' + value),
        10..=15 => char::from(b'a' + (value - 10)),
        _ => '0',
    }
}
