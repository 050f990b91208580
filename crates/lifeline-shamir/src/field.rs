//! Prime field GF(p) arithmetic for Shamir's Secret Sharing
//!
//! p = 2^61 - 1 (a Mersenne prime). Products fit in a u128 and reduce with
//! two shift-and-add folds, no division needed.

use rand::RngCore;

/// The field modulus, 2^61 - 1
pub const MODULUS: u64 = (1 << 61) - 1;

/// Reduce a 128-bit product into [0, p)
#[inline]
fn reduce(x: u128) -> u64 {
    let p = MODULUS as u128;
    let folded = (x & p) + (x >> 61);
    let folded = (folded & p) + (folded >> 61);
    let r = folded as u64;
    if r >= MODULUS {
        r - MODULUS
    } else {
        r
    }
}

/// Add two field elements
#[inline]
pub fn add(a: u64, b: u64) -> u64 {
    let s = a + b;
    if s >= MODULUS {
        s - MODULUS
    } else {
        s
    }
}

/// Subtract two field elements, normalised into [0, p)
#[inline]
pub fn sub(a: u64, b: u64) -> u64 {
    if a >= b {
        a - b
    } else {
        a + MODULUS - b
    }
}

/// Multiply two field elements
#[inline]
pub fn mul(a: u64, b: u64) -> u64 {
    reduce(a as u128 * b as u128)
}

/// Raise `base` to `exp` by square-and-multiply
pub fn pow(mut base: u64, mut exp: u64) -> u64 {
    let mut result = 1u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = mul(result, base);
        }
        base = mul(base, base);
        exp >>= 1;
    }
    result
}

/// Multiplicative inverse via Fermat's little theorem. `None` for zero.
pub fn inv(a: u64) -> Option<u64> {
    if a % MODULUS == 0 {
        return None;
    }
    Some(pow(a, MODULUS - 2))
}

/// Uniformly random element of [0, p)
pub fn random_element<R: RngCore>(rng: &mut R) -> u64 {
    loop {
        // 61 random bits; only the value p itself is rejected
        let candidate = rng.next_u64() >> 3;
        if candidate < MODULUS {
            return candidate;
        }
    }
}

/// Evaluate a polynomial at x.
/// coefficients[0] is the constant term
pub fn poly_eval(coefficients: &[u64], x: u64) -> u64 {
    // Horner's method
    coefficients
        .iter()
        .rev()
        .fold(0u64, |acc, &coef| add(mul(acc, x), coef))
}

/// Lagrange interpolation of the polynomial through `points`, evaluated at `x`.
///
/// Returns `None` if two points share an x coordinate.
pub fn lagrange_interpolate_at(points: &[(u64, u64)], x: u64) -> Option<u64> {
    let mut result = 0u64;

    for (i, &(xi, yi)) in points.iter().enumerate() {
        let mut numerator = 1u64;
        let mut denominator = 1u64;

        for (j, &(xj, _)) in points.iter().enumerate() {
            if i != j {
                numerator = mul(numerator, sub(x, xj));
                denominator = mul(denominator, sub(xi, xj));
            }
        }

        let li = mul(numerator, inv(denominator)?);
        result = add(result, mul(yi, li));
    }

    Some(result)
}

/// Recover the constant term (the secret chunk)
pub fn lagrange_interpolate(points: &[(u64, u64)]) -> Option<u64> {
    lagrange_interpolate_at(points, 0)
}
