//! Pollard-rho factorization with Brent cycle detection, used for the
//! handshake's PQ proof-of-work.

use std::fmt;

/// Failure after the full retry budget.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FactorizeError {
    AttemptsExhausted,
}

impl fmt::Display for FactorizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttemptsExhausted => write!(f, "pq factorization attempts exhausted"),
        }
    }
}

impl std::error::Error for FactorizeError {}

const ATTEMPTS: u32 = 3;

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

fn abs_sub(a: u128, b: u128) -> u128 {
    a.max(b) - a.min(b)
}

/// One bounded rho walk. `x0` is the start point, `c` the polynomial
/// offset, `lim` the iteration budget; the tortoise is resnapshotted at
/// every power of two (Brent).
fn rho(n: u128, x0: u128, c: u128, lim: u64) -> Option<u128> {
    let mut x = x0;
    let mut y = x0;
    let mut g = 1u128;
    let mut i = 0u64;
    while g == 1 && i < lim {
        i += 1;
        if i.is_power_of_two() {
            y = x;
        }
        x = (x * x + c) % n;
        g = gcd(abs_sub(x, y), n);
    }
    if g > 1 && g < n { Some(g) } else { None }
}

/// Splits `pq` into `(p, q)` with `p <= q`.
///
/// Each attempt draws fresh start parameters and widens the iteration
/// budget; composite inputs of the sizes the handshake produces (two
/// 31/32-bit primes) split on the first attempt in practice.
pub fn factorize(pq: u64) -> Result<(u64, u64), FactorizeError> {
    let mut seed = [0u8; 16];
    getrandom::getrandom(&mut seed).expect("failed to generate secure random data");
    let mut state = u128::from_le_bytes(seed);
    do_factorize(pq, move || {
        // xorshift over the secure seed; the walk only needs varied
        // start points, not a stream of secure values
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state as u64
    })
}

/// Deterministic core with an injected start-point source.
pub fn do_factorize(
    pq: u64,
    mut next_random: impl FnMut() -> u64,
) -> Result<(u64, u64), FactorizeError> {
    if pq < 4 {
        return Err(FactorizeError::AttemptsExhausted);
    }
    if pq % 2 == 0 {
        return Ok((2, pq / 2));
    }
    let n = pq as u128;
    for attempt in 0..ATTEMPTS {
        let x0 = 2 + (next_random() as u128) % (n - 3);
        let c = 1 + (next_random() as u128) % (n - 1);
        let lim = 1u64 << (18 + attempt);
        if let Some(g) = rho(n, x0, c, lim) {
            let p = g as u64;
            let q = pq / p;
            return Ok((p.min(q), p.max(q)));
        }
    }
    Err(FactorizeError::AttemptsExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_semiprimes() {
        assert_eq!(
            factorize(1470626929934143021),
            Ok((1206429347, 1218991343))
        );
        assert_eq!(
            factorize(2363612107535801713),
            Ok((1518968219, 1556064227))
        );
    }

    #[test]
    fn even_input_splits_immediately() {
        assert_eq!(factorize(2 * 1218991343), Ok((2, 1218991343)));
    }

    #[test]
    fn deterministic_with_injected_source() {
        let mut counter = 0u64;
        let source = move || {
            counter = counter.wrapping_add(0x9e37_79b9_7f4a_7c15);
            counter
        };
        assert_eq!(
            do_factorize(1470626929934143021, source),
            Ok((1206429347, 1218991343))
        );
    }

    #[test]
    fn tiny_inputs_are_rejected() {
        assert_eq!(factorize(3), Err(FactorizeError::AttemptsExhausted));
    }
}
