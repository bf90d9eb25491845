// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Pollard rho, Brent variant, over Montgomery arithmetic.
//!
//! Used for inputs fitting 64 bits and to split composite cofactors
//! of double large prime relations. Differences are accumulated into
//! a running product so one gcd covers a batch of iterations; the
//! extra Montgomery R factors do not change the gcd because R is a
//! unit modulo n.
//!
//! References:
//! R.P. Brent, An improved Monte Carlo factorization algorithm, 1980

use num_integer::Integer;

use crate::montgomery::Montgomery64;

const BATCH: u64 = 128;

/// Attempt to split a 64-bit composite expected to be a product of two
/// primes of similar size, with budgets scaled to the input width.
pub fn rho_semiprime(n: u64) -> Option<(u64, u64)> {
    let bits = 64 - n.leading_zeros();
    let budget = match bits {
        0..=36 => 1_500,
        37..=45 => 8_000,
        46..=52 => 30_000,
        53..=58 => 100_000,
        _ => 300_000,
    };
    rho64(n, 1, budget).or_else(|| rho64(n, 3, budget))
}

/// Brent cycle detection on x -> x^2 + c modulo n with at most `iters`
/// squarings. Returns a nontrivial splitting of n.
pub fn rho64(n: u64, c: u64, iters: u64) -> Option<(u64, u64)> {
    if n < 4 {
        return None;
    }
    if n % 2 == 0 {
        return Some((2, n / 2));
    }
    let mg = Montgomery64::new(n);
    let cm = c % n;
    let f = |x: u64| mg.add(mg.sq(x), cm);
    let mut y = cm;
    let mut r: u64 = 1;
    let mut q: u64 = 1;
    let mut count: u64 = 0;
    while count < iters {
        let x = y;
        for _ in 0..r {
            y = f(y);
        }
        let mut k = 0;
        while k < r && count < iters {
            let ys = y;
            let lim = BATCH.min(r - k);
            for _ in 0..lim {
                y = f(y);
                q = mg.mul(q, x.abs_diff(y));
            }
            let g = Integer::gcd(&q, &n);
            if g > 1 {
                if g < n {
                    return Some((g, n / g));
                }
                // The whole batch collapsed: replay it one step at a
                // time from the saved position.
                let mut z = ys;
                for _ in 0..=lim {
                    z = f(z);
                    let g = Integer::gcd(&x.abs_diff(z), &n);
                    if g > 1 {
                        return if g < n { Some((g, n / g)) } else { None };
                    }
                }
                return None;
            }
            k += lim;
            count += lim;
        }
        r *= 2;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pseudoprime::is_prime64;

    #[test]
    fn test_rho_semiprimes() {
        let ns: &[u64] = &[
            235075827453629,
            166130059616737,
            159247921097933,
            224077614412439,
            219669028971857,
            10023859281455311421,
        ];
        for &n in ns {
            let mut done = false;
            for budget in [10_000u64, 100_000, 1_000_000, 10_000_000] {
                if let Some((p, q)) = rho64(n, 1, budget).or_else(|| rho64(n, 3, budget)) {
                    assert_eq!(p * q, n);
                    assert!(p > 1 && q > 1);
                    done = true;
                    break;
                }
            }
            assert!(done, "failed to factor {n}");
        }
    }

    #[test]
    fn test_rho_random_products() {
        let mut p = 123456789u64;
        let mut q = 198765431u64;
        for i in 0..40 {
            p += 2468;
            q += 1590;
            while !is_prime64(p) {
                p += 1;
            }
            while !is_prime64(q) {
                q += 1;
            }
            let n = p * q;
            let mut found = None;
            for budget in [50_000u64, 500_000, 5_000_000] {
                found = rho64(n, 1 + (i % 3), budget);
                if found.is_some() {
                    break;
                }
            }
            let (a, b) = found.unwrap_or_else(|| panic!("failed on {p}*{q}"));
            assert_eq!(a * b, n);
        }
    }

    #[test]
    fn test_rho_square() {
        let p = 1000003u64;
        let (a, b) = rho_semiprime(p * p).expect("squares split");
        assert_eq!((a, b), (p, p));
    }

    #[test]
    fn test_rho_prime_fails() {
        for p in [1429332497u64, 3267000013] {
            assert_eq!(rho64(p, 1, 200_000), None);
        }
    }
}
