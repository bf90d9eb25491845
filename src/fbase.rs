// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Prime enumeration and the quadratic sieve factor base.

use crate::arith::{self, PrimeDiv};
use crate::params::LOG_SCALE;
use crate::Uint;

/// A factor base prime was found to divide the input number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnexpectedFactor(pub u64);

impl std::fmt::Display for UnexpectedFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "input is divisible by factor base prime {}", self.0)
    }
}

/// The first n prime numbers.
pub fn primes(n: u32) -> Vec<u32> {
    // The n-th prime is below n * bitlength(n) except for tiny n.
    let bound = std::cmp::max(128, n as usize * (32 - n.leading_zeros()) as usize);
    // composite[i] marks 2i+1
    let mut composite = vec![false; bound / 2];
    let mut out = Vec::with_capacity(n as usize);
    out.push(2u32);
    let mut i = 1;
    while out.len() < n as usize {
        assert!(i < composite.len(), "prime bound too small for n={n}");
        if !composite[i] {
            let p = 2 * i + 1;
            out.push(p as u32);
            let mut j = (p * p) / 2;
            while j < composite.len() {
                composite[j] = true;
                j += p;
            }
        }
        i += 1;
    }
    out
}

/// A segmented sieve of Eratosthenes streaming primes below 2^32 in
/// blocks, keeping a 64 KiB footprint.
pub struct PrimeSieve {
    small: Vec<u32>,
    // Next multiple of each small prime, relative to `base`.
    offsets: Vec<u32>,
    marks: Vec<bool>,
    base: u64,
    started: bool,
    block: Vec<u32>,
}

const SEGMENT: u64 = 1 << 16;

impl PrimeSieve {
    pub fn new() -> Self {
        // All primes below 2^16.
        let small = primes(6542);
        debug_assert_eq!(small.last(), Some(&65521));
        let offsets = small
            .iter()
            .map(|&p| ((p as u64 - SEGMENT % p as u64) % p as u64) as u32)
            .collect();
        PrimeSieve {
            small,
            offsets,
            marks: vec![false; SEGMENT as usize],
            base: SEGMENT,
            started: false,
            block: vec![],
        }
    }

    /// The next block of primes; empty once 2^32 is reached.
    pub fn next_block(&mut self) -> &[u32] {
        if !self.started {
            self.started = true;
            return &self.small;
        }
        if self.base >= 1 << 32 {
            self.block.clear();
            return &self.block;
        }
        self.marks.fill(false);
        for (&p, off) in self.small.iter().zip(self.offsets.iter_mut()) {
            let mut o = *off as u64;
            while o < SEGMENT {
                self.marks[o as usize] = true;
                o += p as u64;
            }
            *off = (o - SEGMENT) as u32;
        }
        self.block.clear();
        for (idx, &m) in self.marks.iter().enumerate() {
            if !m {
                self.block.push((self.base + idx as u64) as u32);
            }
        }
        self.base += SEGMENT;
        &self.block
    }
}

/// The factor base for n: primes p with (n/p) = 1, the two square
/// roots of n modulo each, and integer log approximations. Parallel
/// vectors keep the sieve loops cache friendly.
#[derive(Clone, Debug)]
pub struct FBase {
    pub primes: Vec<u32>,
    // Smaller square root of n mod p; the other root is p - r.
    pub roots: Vec<u32>,
    // ceil(10 ln p)
    pub logs: Vec<u8>,
    pub divs: Vec<PrimeDiv>,
}

impl FBase {
    /// Builds a factor base of `size` primes for n (already multiplied
    /// by the small multiplier k, which is skipped when it shows up as
    /// a divisor).
    pub fn new(n: &Uint, size: u32, multiplier: u32) -> Result<FBase, UnexpectedFactor> {
        let mut fb = FBase {
            primes: Vec::with_capacity(size as usize),
            roots: Vec::with_capacity(size as usize),
            logs: Vec::with_capacity(size as usize),
            divs: Vec::with_capacity(size as usize),
        };
        let mut sieve = PrimeSieve::new();
        'blocks: loop {
            let block = sieve.next_block().to_vec();
            if block.is_empty() {
                break;
            }
            for p in block {
                if fb.primes.len() == size as usize {
                    break 'blocks;
                }
                let div = PrimeDiv::new(p);
                let np = div.mod_uint(n);
                let r = if p == 2 {
                    if np == 0 {
                        // n must be odd here.
                        return Err(UnexpectedFactor(2));
                    }
                    1
                } else if np == 0 {
                    if multiplier % p == 0 {
                        continue;
                    }
                    return Err(UnexpectedFactor(p as u64));
                } else if arith::jacobi(np, p as u64) == 1 {
                    arith::sqrt_mod(np, p as u64).expect("residue must have a root")
                } else {
                    continue;
                };
                fb.primes.push(p);
                fb.roots.push(r as u32);
                fb.logs.push((LOG_SCALE * (p as f64).ln()).ceil() as u8);
                fb.divs.push(div);
            }
        }
        Ok(fb)
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    /// The smoothness bound.
    pub fn bound(&self) -> u32 {
        *self.primes.last().unwrap()
    }

    #[inline]
    pub fn p(&self, idx: usize) -> u32 {
        self.primes[idx]
    }

    #[inline]
    pub fn r(&self, idx: usize) -> u32 {
        self.roots[idx]
    }

    #[inline]
    pub fn log(&self, idx: usize) -> u8 {
        self.logs[idx]
    }

    #[inline]
    pub fn div(&self, idx: usize) -> &PrimeDiv {
        &self.divs[idx]
    }

    pub fn smalls(&self) -> &[u32] {
        &self.primes[..self.len().min(10)]
    }
}

const MAX_MULTIPLIER: u32 = 97;

/// Selects an odd k such that kn is a quadratic residue modulo many
/// small primes (Knuth-Schroeppel). The score is the expected log
/// contribution of small primes to sieved values, corrected for the
/// growth of Q by sqrt(k).
pub fn select_multiplier(n: &Uint) -> (u32, f64) {
    let ps = primes(40);
    let divs: Vec<PrimeDiv> = ps.iter().map(|&p| PrimeDiv::new(p)).collect();
    let mut best = (1u32, f64::MIN);
    for k in (1..=MAX_MULTIPLIER).step_by(2) {
        let nk = n * Uint::from(k as u64);
        let mut score = -0.5 * (k as f64).ln();
        score += match nk.digits()[0] & 7 {
            // kn = 1 mod 8: x^2-kn is divisible by 8 for half the odd x.
            1 => 2.0,
            5 => 1.0,
            3 | 7 => 0.5,
            _ => 0.0,
        } * std::f64::consts::LN_2;
        for (&p, div) in ps[1..].iter().zip(&divs[1..]) {
            let np = div.mod_uint(&nk);
            let w = if np == 0 {
                1.0 / p as f64
            } else if arith::jacobi(np, p as u64) == 1 {
                2.0 / p as f64
            } else {
                0.0
            };
            score += w * (p as f64).ln();
        }
        if score > best.1 {
            best = (k, score);
        }
    }
    best
}
