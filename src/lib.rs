// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Integer factorization built around a quadratic sieve.
//!
//! [`factor`] returns the multiset of prime factors of its input;
//! [`find_divisor`] exposes the single-split primitive. Inputs fitting
//! 64 bits are split by Pollard rho, larger ones by the quadratic
//! sieve with one- and optionally two-large-prime relations.

pub mod arith;
pub mod fbase;
pub mod matrix;
pub mod montgomery;
pub mod params;
pub mod pollard_rho;
pub mod pseudoprime;
pub mod qsieve;
pub mod relations;
pub mod sieve;
pub mod uint128;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::arith::PrimeDiv;

/// Working integer type. Inputs stay within roughly 400 bits; the
/// extra width absorbs Montgomery radix products and squarings.
pub type Uint = bnum::types::U1024;
pub type Int = bnum::types::I1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    #[default]
    Silent,
    Info,
    Verbose,
    Debug,
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "silent" | "0" => Ok(Verbosity::Silent),
            "info" | "1" => Ok(Verbosity::Info),
            "verbose" | "2" => Ok(Verbosity::Verbose),
            "debug" | "3" => Ok(Verbosity::Debug),
            _ => Err(format!("unknown verbosity {s:?}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The input does not satisfy the preconditions (n <= 1, or an
    /// even modulus where an odd one is required).
    InvalidInput,
    /// The linear algebra produced no usable null vector even after
    /// internal retries with larger factor bases.
    InsufficientRelations,
    /// Aborted by the caller or by the sieve time budget; carries the
    /// factors found so far, including unfinished composites.
    Cancelled(Vec<Uint>),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidInput => write!(f, "invalid input"),
            Error::InsufficientRelations => write!(f, "not enough relations"),
            Error::Cancelled(fs) => write!(f, "cancelled ({} partial factors)", fs.len()),
        }
    }
}

impl std::error::Error for Error {}

/// Tunables for [`factor`] and [`find_divisor`]. The defaults follow
/// the built-in parameter tables.
#[derive(Clone, Debug)]
pub struct Preferences {
    /// Worker thread count; 0 selects the hardware default (and a
    /// single thread for small inputs where threading only costs).
    pub threads: usize,
    /// Factor base size override.
    pub fb_size: Option<u32>,
    /// Sieve threshold percentage (default 85).
    pub lower_bound_percent: Option<u32>,
    /// Window length in counter entries (default 200000).
    pub interval_size: Option<usize>,
    /// Small odd multiplier; 0 selects the Knuth-Schroeppel best.
    pub multiplier: u32,
    /// Extra calibration of the sieve threshold.
    pub threshold_exponent: Option<f64>,
    /// Combine one-large-prime relations (default true).
    pub process_partial_relations: bool,
    /// Also combine two-large-prime relations (default false).
    pub two_large_primes: bool,
    /// Row weight cap of the structured elimination.
    pub merge_limit: Option<usize>,
    /// Wall clock budget for the sieve phase, in seconds.
    pub sieve_time_limit: Option<f64>,
    /// Seconds between progress reports.
    pub reporting_interval: Option<f64>,
    pub verbosity: Verbosity,
    abort: Arc<AtomicBool>,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            threads: 0,
            fb_size: None,
            lower_bound_percent: None,
            interval_size: None,
            multiplier: 1,
            threshold_exponent: None,
            process_partial_relations: true,
            two_large_primes: false,
            merge_limit: None,
            sieve_time_limit: None,
            reporting_interval: None,
            verbosity: Verbosity::Silent,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Preferences {
    pub fn verbose(&self, v: Verbosity) -> bool {
        self.verbosity >= v
    }

    /// Shared flag that cancels a running factorization when set.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    pub fn should_abort(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }
}

/// The multiset of prime factors of n, in ascending order.
/// `factor(1)` is empty.
pub fn factor(n: &Uint, prefs: &Preferences) -> Result<Vec<Uint>, Error> {
    if n.is_zero() {
        return Err(Error::InvalidInput);
    }
    let mut factors = vec![];
    let mut m = *n;
    // Powers of two short-circuit before any sieve machinery.
    let tz = m.trailing_zeros();
    for _ in 0..tz {
        factors.push(Uint::from(2u64));
    }
    m = m >> tz;
    // Small primes by trial division.
    for p in fbase::primes(1000) {
        if Uint::from(p as u64 * p as u64) > m {
            break;
        }
        let div = PrimeDiv::new(p);
        loop {
            let (q, r) = div.divmod_uint(&m);
            if r != 0 {
                break;
            }
            factors.push(Uint::from(p as u64));
            m = q;
        }
    }
    if m > Uint::ONE {
        let tpool = build_pool(prefs, &m);
        split_all(m, prefs, tpool.as_ref(), &mut factors)?;
    }
    factors.sort_unstable();
    Ok(factors)
}

/// A nontrivial divisor of composite n, or 0 when none was found.
pub fn find_divisor(n: &Uint, prefs: &Preferences) -> Uint {
    if *n <= Uint::ONE || pseudoprime::is_prime(n) {
        return Uint::ZERO;
    }
    for p in fbase::primes(1000) {
        let pu = Uint::from(p as u64);
        if pu * pu > *n {
            break;
        }
        if PrimeDiv::new(p).mod_uint(n) == 0 {
            return pu;
        }
    }
    if let Some((r, _)) = arith::perfect_power(*n) {
        return r;
    }
    let tpool = build_pool(prefs, n);
    match find_divisor_inner(n, prefs, tpool.as_ref()) {
        Ok(d) => d,
        Err(_) => Uint::ZERO,
    }
}

// Splits every entry down to primes, recursing through a work stack.
fn split_all(
    n: Uint,
    prefs: &Preferences,
    tpool: Option<&rayon::ThreadPool>,
    out: &mut Vec<Uint>,
) -> Result<(), Error> {
    let mut stack = vec![n];
    while let Some(m) = stack.pop() {
        if m == Uint::ONE {
            continue;
        }
        if prefs.should_abort() {
            stack.push(m);
            return Err(Error::Cancelled(partial(out, &stack)));
        }
        if pseudoprime::is_prime(&m) {
            out.push(m);
            continue;
        }
        if let Some((r, k)) = arith::perfect_power(m) {
            for _ in 0..k {
                stack.push(r);
            }
            continue;
        }
        match find_divisor_inner(&m, prefs, tpool) {
            Ok(d) if !d.is_zero() => {
                debug_assert!(d > Uint::ONE && d < m && (m % d).is_zero());
                stack.push(d);
                stack.push(m / d);
            }
            Ok(_) => return Err(Error::InsufficientRelations),
            Err(Error::Cancelled(_)) => {
                stack.push(m);
                return Err(Error::Cancelled(partial(out, &stack)));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn partial(done: &[Uint], remaining: &[Uint]) -> Vec<Uint> {
    let mut v = done.to_vec();
    v.extend_from_slice(remaining);
    v
}

fn find_divisor_inner(
    n: &Uint,
    prefs: &Preferences,
    tpool: Option<&rayon::ThreadPool>,
) -> Result<Uint, Error> {
    if n.bits() <= 64 {
        let m = n.digits()[0];
        // Brent rho splits any 64-bit composite given enough rounds.
        let mut budget = 20_000u64;
        for seed in 1..64u64 {
            if prefs.should_abort() {
                return Err(Error::Cancelled(vec![]));
            }
            if let Some((p, _)) = pollard_rho::rho64(m, seed, budget) {
                return Ok(Uint::from(p));
            }
            budget = (budget * 2).min(1 << 26);
        }
        return Ok(Uint::ZERO);
    }
    match qsieve::qsieve(n, prefs, tpool) {
        Ok((p, _)) => Ok(p),
        Err(Error::InsufficientRelations) => Ok(Uint::ZERO),
        Err(e) => Err(e),
    }
}

fn build_pool(prefs: &Preferences, n: &Uint) -> Option<rayon::ThreadPool> {
    let threads = match prefs.threads {
        // Threading overhead dominates below ~10^10.
        0 if n.bits() <= 34 => 1,
        0 => std::thread::available_parallelism()
            .map(|t| t.get())
            .unwrap_or(1),
        t => t,
    };
    if threads <= 1 {
        return None;
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(s: &str) -> Uint {
        Uint::from_str(s).unwrap()
    }

    #[test]
    fn test_factor_trivial() {
        let prefs = Preferences::default();
        assert_eq!(factor(&Uint::ONE, &prefs), Ok(vec![]));
        assert_eq!(factor(&Uint::ZERO, &prefs), Err(Error::InvalidInput));
        assert_eq!(
            factor(&Uint::from(2u64), &prefs),
            Ok(vec![Uint::from(2u64)])
        );
        assert_eq!(
            factor(&Uint::from(97u64), &prefs),
            Ok(vec![Uint::from(97u64)])
        );
    }

    #[test]
    fn test_factor_power_of_two() {
        let prefs = Preferences::default();
        let fs = factor(&(Uint::ONE << 16), &prefs).unwrap();
        assert_eq!(fs, vec![Uint::from(2u64); 16]);
    }

    #[test]
    fn test_factor_small_composites() {
        let prefs = Preferences::default();
        assert_eq!(
            factor(&Uint::from(101u64 * 103), &prefs).unwrap(),
            vec![Uint::from(101u64), Uint::from(103u64)]
        );
        // 2 * 3 * 5 * 7 * 11 * 13 * 17 * 19 * 23 * 29
        let fs = factor(&Uint::from(6469693230u64), &prefs).unwrap();
        let expect: Vec<Uint> = [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29]
            .iter()
            .map(|&p| Uint::from(p))
            .collect();
        assert_eq!(fs, expect);
    }

    #[test]
    fn test_factor_perfect_power() {
        let prefs = Preferences::default();
        // 10007 is prime and above the trial division products.
        let n = Uint::from(10007u64).pow(4);
        assert_eq!(factor(&n, &prefs).unwrap(), vec![Uint::from(10007u64); 4]);
    }

    #[test]
    fn test_factor_64bit_semiprime() {
        // 10023859281455311421 = 1308520867 * 7660450463
        let prefs = Preferences::default();
        let fs = factor(&u("10023859281455311421"), &prefs).unwrap();
        assert_eq!(
            fs,
            vec![Uint::from(1308520867u64), Uint::from(7660450463u64)]
        );
    }

    #[test]
    fn test_factor_through_qsieve() {
        // 70-bit semiprime, above the rho cutoff.
        let p = Uint::from(1000000007u64);
        let q = Uint::from(999999999989u64);
        let prefs = Preferences::default();
        let fs = factor(&(p * q), &prefs).unwrap();
        assert_eq!(fs, vec![p, q]);
    }

    #[test]
    fn test_factor_product_roundtrip() {
        let prefs = Preferences::default();
        let n = u("614889782588491410");
        let fs = factor(&n, &prefs).unwrap();
        let mut prod = Uint::ONE;
        for f in &fs {
            assert!(pseudoprime::is_prime(f), "{f} is not prime");
            prod *= *f;
        }
        assert_eq!(prod, n);
    }

    #[test]
    fn test_find_divisor() {
        let prefs = Preferences::default();
        // Precondition violations and primes give 0.
        assert_eq!(find_divisor(&Uint::ONE, &prefs), Uint::ZERO);
        assert_eq!(find_divisor(&Uint::from(97u64), &prefs), Uint::ZERO);
        let n = u("10023859281455311421");
        let d = find_divisor(&n, &prefs);
        assert!(d > Uint::ONE && d < n);
        assert!((n % d).is_zero());
        // Divisor of an even composite.
        assert_eq!(find_divisor(&Uint::from(33554432u64), &prefs), Uint::from(2u64));
    }

    #[test]
    fn test_factor_cancelled() {
        let prefs = Preferences::default();
        prefs.abort_flag().store(true, Ordering::SeqCst);
        let p = Uint::from(1000000007u64);
        let q = Uint::from(999999999989u64);
        match factor(&(p * q), &prefs) {
            Err(Error::Cancelled(partial)) => {
                let mut prod = Uint::ONE;
                for f in &partial {
                    prod *= *f;
                }
                assert_eq!(prod, p * q);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    // 47-digit input: several minutes of sieving in debug builds.
    #[test]
    #[ignore]
    fn test_factor_rsa_like() {
        let prefs = Preferences::default();
        let p = u("287288745765902964785862069919080712937");
        let q = Uint::from(7660450463u64);
        let fs = factor(&(p * q), &prefs).unwrap();
        assert_eq!(fs, vec![q, p]);
    }

    #[test]
    #[ignore]
    fn test_factor_64_digits() {
        let prefs = Preferences::default();
        let n = u("5382000000735683358022919837657883000000078236999000000000000063");
        let fs = factor(&n, &prefs).unwrap();
        assert_eq!(fs.len(), 2);
        let mut prod = Uint::ONE;
        for f in &fs {
            assert!(pseudoprime::is_prime(f));
            prod *= *f;
        }
        assert_eq!(prod, n);
    }

    #[test]
    #[ignore]
    fn test_factor_fermat_like() {
        let prefs = Preferences::default();
        let n = (Uint::ONE << 214) + Uint::ONE;
        let fs = factor(&n, &prefs).unwrap();
        let mut prod = Uint::ONE;
        for f in &fs {
            assert!(pseudoprime::is_prime(f), "{f} is not prime");
            prod *= *f;
        }
        assert_eq!(prod, n);
    }
}
