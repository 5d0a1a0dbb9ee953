//! Identifier helpers: bech32-encoded record ids and legal case numbers

use bech32::Bech32m;
use rand::Rng;
use uuid7::uuid7;

pub const AGREEMENT_HRP: &str = "agr_";
pub const USER_HRP: &str = "user_";

const CASE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CASE_SUFFIX_LEN: usize = 8;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Builds a case number of the form `<prefix>-<year>-<8 upper-case alphanumerics>`.
///
/// Uniqueness is not guaranteed here; the store reserves each candidate
/// inside the escalating transaction and asks for another on collision.
pub fn new_case_number(prefix: &str, year: i32) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CASE_SUFFIX_LEN)
        .map(|_| CASE_ALPHABET[rng.gen_range(0..CASE_ALPHABET.len())] as char)
        .collect();

    format!("{prefix}-{year}-{suffix}")
}

/// Checks the `<prefix>-<year>-<suffix>` shape produced by [`new_case_number`].
pub fn is_case_number(prefix: &str, candidate: &str) -> bool {
    let mut parts = candidate.splitn(3, '-');
    let (Some(p), Some(year), Some(suffix)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };

    p == prefix
        && year.len() == 4
        && year.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == CASE_SUFFIX_LEN
        && suffix.bytes().all(|b| CASE_ALPHABET.contains(&b))
}
