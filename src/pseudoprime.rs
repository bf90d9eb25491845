// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Miller-Rabin primality testing over Montgomery arithmetic.

use rand::Rng;

use crate::arith::PrimeDiv;
use crate::montgomery::{shared_montgomery, ZmodN};
use crate::Uint;

// Sufficient witness set for a deterministic answer on 64-bit inputs.
const WITNESSES64: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

// Number of additional random bases for multiword inputs; a composite
// survives each base with probability < 1/4.
const BIG_EXTRA_BASES: usize = 16;

/// Deterministic primality test for 64-bit integers.
pub fn is_prime64(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in WITNESSES64 {
        if n == p {
            return true;
        }
        if n % p == 0 {
            return false;
        }
    }
    let s = (n - 1).trailing_zeros();
    let d = (n - 1) >> s;
    let mg = shared_montgomery(n);
    let one = mg.one();
    let minus_one = mg.minus_one();
    'witness: for b in WITNESSES64 {
        let mut x = mg.pow(mg.to_mg(b % n), d);
        if x == one || x == minus_one {
            continue;
        }
        for _ in 1..s {
            x = mg.sq(x);
            if x == minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Probable-prime test for big integers: the 64-bit witness set plus
/// random bases. Callers treat a false positive as astronomically
/// improbable.
pub fn is_prime(n: &Uint) -> bool {
    if n.bits() <= 64 {
        return is_prime64(n.digits()[0]);
    }
    // n has more than one word here so no witness can equal n.
    for p in WITNESSES64 {
        if PrimeDiv::new(p as u32).mod_uint(n) == 0 {
            return false;
        }
    }
    let n1 = n - Uint::ONE;
    let s = n1.trailing_zeros();
    let d = n1 >> s;
    let zn = ZmodN::new(*n);
    let one = zn.one();
    let minus_one = zn.from_int(n1);
    let mut rng = rand::thread_rng();
    let bases = WITNESSES64
        .iter()
        .copied()
        .chain((0..BIG_EXTRA_BASES).map(|_| rng.gen_range(38..u64::MAX)));
    'base: for b in bases {
        let mut x = zn.pow(zn.from_int(Uint::from(b) % *n), &d);
        if x == one || x == minus_one {
            continue;
        }
        for _ in 1..s {
            x = zn.sq(x);
            if x == minus_one {
                continue 'base;
            }
        }
        return false;
    }
    true
}
