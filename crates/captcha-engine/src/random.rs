//! Random sources.
//!
//! Two generators live here:
//! - the OS CSPRNG, used for solutions, ids, and audio noise. A read failure
//!   panics; there is no fallback to weaker randomness.
//! - a fast per-thread `SmallRng` for cosmetic jitter while rendering. Its
//!   output never reaches a solution or an id.

use std::cell::RefCell;

use captcha_common::constants::{ID_ALPHABET, ID_LEN};
use captcha_common::{CaptchaId, DigitSequence};
use rand::rngs::{OsRng, SmallRng};
use rand::{Rng, SeedableRng, TryRngCore};

thread_local! {
    static FAST_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_os_rng());
}

/// Fill a buffer of the given length from the OS CSPRNG.
///
/// # Panics
///
/// Panics if the operating system entropy source cannot be read.
pub fn secure_bytes(length: usize) -> Vec<u8> {
    let mut buf = vec![0u8; length];
    if let Err(e) = OsRng.try_fill_bytes(&mut buf) {
        panic!("captcha: error reading random source: {}", e);
    }
    buf
}

/// Return `length` bytes, each uniformly distributed in `0..modulus`.
///
/// Bytes at or above the largest multiple of `modulus` that fits in 256 are
/// discarded to avoid modulo bias.
///
/// # Panics
///
/// Panics if `modulus` is not in 1..=256 or the entropy source fails.
pub fn secure_bytes_mod(length: usize, modulus: u16) -> Vec<u8> {
    assert!(
        (1..=256).contains(&modulus),
        "modulus must be in 1..=256, got {}",
        modulus
    );
    let limit = 256 - (256 % modulus);
    let mut out = Vec::with_capacity(length);
    while out.len() < length {
        let want = length - out.len();
        for b in secure_bytes(want + want / 4 + 1) {
            let b = u16::from(b);
            if b >= limit {
                continue;
            }
            out.push((b % modulus) as u8);
            if out.len() == length {
                break;
            }
        }
    }
    out
}

/// Generate a solution of `length` digits.
pub fn random_digits(length: usize) -> DigitSequence {
    // Values are already reduced mod 10, so construction cannot fail.
    match DigitSequence::new(secure_bytes_mod(length, 10)) {
        Ok(digits) => digits,
        Err(_) => unreachable!("secure_bytes_mod(_, 10) yields values below 10"),
    }
}

/// Generate a standard captcha id.
pub fn random_id() -> CaptchaId {
    CaptchaId::from_generated(random_id_with(ID_LEN, ID_ALPHABET))
}

/// Generate an id of `length` characters drawn uniformly from `alphabet`.
///
/// # Panics
///
/// Panics if the alphabet is empty or longer than 256 characters.
pub fn random_id_with(length: usize, alphabet: &[u8]) -> String {
    secure_bytes_mod(length, alphabet.len() as u16)
        .into_iter()
        .map(|i| alphabet[usize::from(i)] as char)
        .collect()
}

/// Fork a fresh cosmetic generator from the current thread's state.
pub fn fast_rng() -> SmallRng {
    FAST_RNG.with(|rng| SmallRng::from_rng(&mut *rng.borrow_mut()))
}

/// Random integer in `[from, to]`; an empty range collapses to `from`.
pub fn rnd<R: Rng + ?Sized>(rng: &mut R, from: i32, to: i32) -> i32 {
    if to <= from {
        return from;
    }
    rng.random_range(from..=to)
}

/// Random float in `[from, to)`.
pub fn rndf<R: Rng + ?Sized>(rng: &mut R, from: f64, to: f64) -> f64 {
    (to - from) * rng.random::<f64>() + from
}
