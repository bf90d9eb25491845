// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Modular arithmetic primitives: Jacobi symbol, modular square roots,
//! modular inverses, integer roots, and Barrett reciprocals for the
//! factor base primes.

use num_integer::{Integer, Roots};

pub use num_integer::sqrt as isqrt;

use crate::montgomery::{pow_mod_u64, Montgomery64};
use crate::uint128::U128;
use crate::{Int, Uint};

/// Jacobi symbol (a/n) for odd n, by iterated quadratic reciprocity.
pub fn jacobi(a: u64, n: u64) -> i32 {
    assert!(n & 1 == 1 && n > 0);
    let mut a = a % n;
    let mut n = n;
    let mut t = 1;
    while a != 0 {
        while a & 1 == 0 {
            a >>= 1;
            if n & 7 == 3 || n & 7 == 5 {
                t = -t;
            }
        }
        std::mem::swap(&mut a, &mut n);
        if a & 3 == 3 && n & 3 == 3 {
            t = -t;
        }
        a %= n;
    }
    if n == 1 {
        t
    } else {
        0
    }
}

/// Square root of n modulo a prime p (Tonelli-Shanks).
///
/// Returns the smaller of the two roots. None when n is not a
/// quadratic residue.
pub fn sqrt_mod(n: u64, p: u64) -> Option<u64> {
    if p == 2 {
        return Some(n & 1);
    }
    let a = n % p;
    if a == 0 {
        return Some(0);
    }
    if jacobi(a, p) != 1 {
        return None;
    }
    let r = if p & 3 == 3 {
        // a^((p+1)/4) squares to a^((p+1)/2) = a * a^((p-1)/2) = a
        pow_mod_u64(a, (p >> 2) + 1, p)
    } else {
        // Write p-1 = q * 2^s with q odd.
        let s = (p - 1).trailing_zeros();
        let q = (p - 1) >> s;
        let mut z = 2;
        while jacobi(z, p) != -1 {
            z += 1;
        }
        let mg = Montgomery64::new(p);
        let one = mg.one();
        let mut c = mg.pow(mg.to_mg(z % p), q);
        let mut x = mg.pow(mg.to_mg(a), (q + 1) / 2);
        let mut t = mg.pow(mg.to_mg(a), q);
        let mut m = s;
        while t != one {
            let mut i = 0;
            let mut t2 = t;
            while t2 != one {
                t2 = mg.sq(t2);
                i += 1;
            }
            let mut b = c;
            for _ in 0..m - i - 1 {
                b = mg.sq(b);
            }
            x = mg.mul(x, b);
            c = mg.sq(b);
            t = mg.mul(t, c);
            m = i;
        }
        mg.from_mg(x)
    };
    debug_assert!(U128::wide_mul(r, r).divmod_u64(p).1 == a);
    Some(r.min(p - r))
}

/// Modular inverse of a modulo m, or 0 when gcd(a, m) > 1.
pub fn inv_mod64(a: u64, m: u64) -> u64 {
    if m == 0 {
        return 0;
    }
    let e = Integer::extended_gcd(&(a as i128), &(m as i128));
    if e.gcd != 1 {
        return 0;
    }
    e.x.rem_euclid(m as i128) as u64
}

/// Modular inverse over big integers, or 0 when gcd(a, m) > 1.
pub fn inv_mod(a: &Uint, m: &Uint) -> Uint {
    let e = Integer::extended_gcd(&Int::from_bits(*a), &Int::from_bits(*m));
    if e.gcd != Int::ONE {
        return Uint::ZERO;
    }
    let mi = Int::from_bits(*m);
    (((e.x % mi) + mi) % mi).to_bits()
}

/// Modular exponentiation over big integers.
pub fn pow_mod(b: Uint, e: Uint, m: Uint) -> Uint {
    let mut res = Uint::ONE % m;
    let mut sq = b % m;
    for i in 0..e.bits() {
        if e.bit(i) {
            res = (res * sq) % m;
        }
        sq = (sq * sq) % m;
    }
    res
}

/// Integer k-th root with r^k <= n < (r+1)^k.
pub fn nth_root(n: Uint, k: u32) -> Uint {
    n.nth_root(k)
}

/// Natural log of a big integer from its top mantissa bits.
pub fn ln_uint(n: &Uint) -> f64 {
    let b = n.bits();
    if b <= 53 {
        return (n.digits()[0] as f64).ln();
    }
    let top = (*n >> (b - 53)).digits()[0];
    (top as f64).ln() + (b - 53) as f64 * std::f64::consts::LN_2
}

/// Tests whether n = p^k for some k <= 20. Larger exponents imply a
/// base below the factor base bound and are caught by trial division.
pub fn perfect_power(n: Uint) -> Option<(Uint, u32)> {
    for k in [2u32, 3, 5, 7, 11, 13, 17, 19] {
        let r = n.nth_root(k);
        if r.pow(k) == n {
            return match perfect_power(r) {
                Some((rr, kk)) => Some((rr, k * kk)),
                None => Some((r, k)),
            };
        }
    }
    None
}

/// Barrett reciprocal of a fixed factor base prime, replacing division
/// by multiply-and-shift on the sieve hot paths.
///
/// <https://gmplib.org/~tege/divcnst-pldi94.pdf>
#[derive(Clone, Copy, Debug)]
pub struct PrimeDiv {
    pub p: u32,
    // 64-bit mantissa of 2^127/p: floor(n/p) = (n * m64) >> s64 after
    // one correction step.
    m64: u64,
    s64: u32,
    // floor(2^64 / p) and 2^64 mod p, for word-by-word division of
    // multiword integers.
    q64: u64,
    r64: u64,
    // 17-bit reciprocal, exact on 16-bit operands.
    m16: u32,
    s16: u32,
}

impl PrimeDiv {
    pub fn new(p: u32) -> Self {
        assert!(p > 1);
        if p == 2 {
            return PrimeDiv {
                p: 2,
                m64: 1,
                s64: 1,
                q64: 1 << 63,
                r64: 0,
                m16: 1,
                s16: 1,
            };
        }
        // ceil(2^127 / p), truncated to a 64-bit mantissa.
        let m127 = U128::new(1 << 63, 0).divmod_u32(p).0;
        let sz = m127.bits();
        let m64 = (m127 >> (sz - 64)).lo64() + 1;
        let s64 = 127 + 64 - sz;
        let q64 = (m64 - 1) >> (s64 - 64);
        let r64 = ((u64::MAX % p as u64) + 1) % p as u64;
        debug_assert!(q64.wrapping_mul(p as u64).wrapping_add(r64) == 0);
        // 17-bit mantissa for 16-bit operands.
        let m63 = (1u64 << 63) / p as u64;
        let sz16 = 64 - m63.leading_zeros();
        let m16 = (m63 >> (sz16 - 17)) as u32 + 1;
        let s16 = 63 + 17 - sz16;
        PrimeDiv {
            p,
            m64,
            s64,
            q64,
            r64,
            m16,
            s16,
        }
    }

    #[inline]
    pub fn divmod_u64(&self, n: u64) -> (u64, u64) {
        let q = (U128::wide_mul(n, self.m64) >> self.s64).lo64();
        let qp = q * self.p as u64;
        if qp > n {
            (q - 1, self.p as u64 - (qp - n))
        } else {
            (q, n - qp)
        }
    }

    #[inline]
    pub fn mod_u64(&self, n: u64) -> u64 {
        self.divmod_u64(n).1
    }

    pub fn mod_i64(&self, n: i64) -> u64 {
        if n < 0 {
            let r = self.divmod_u64(n.unsigned_abs()).1;
            if r == 0 {
                0
            } else {
                self.p as u64 - r
            }
        } else {
            self.divmod_u64(n as u64).1
        }
    }

    #[inline]
    pub fn mod_u16(&self, n: u16) -> u16 {
        if self.p == 2 {
            return n & 1;
        }
        let q = ((n as u64 * self.m16 as u64) >> self.s16) as u16;
        n - q * self.p as u16
    }

    pub fn divmod_uint(&self, n: &Uint) -> (Uint, u64) {
        if self.p == 2 {
            return (n >> 1u32, n.digits()[0] & 1);
        }
        let mut digits = *n.digits();
        let rem = self.div_words(&mut digits);
        (Uint::from_digits(digits), rem)
    }

    pub fn mod_uint(&self, n: &Uint) -> u64 {
        if self.p == 2 {
            return n.digits()[0] & 1;
        }
        let mut digits = *n.digits();
        self.div_words(&mut digits)
    }

    // Word-by-word long division, high to low. For a running remainder
    // c and word d: c*2^64 + d = (c*q64)*p + c*r64 + d, and the second
    // term stays below 2^64 because c < p < 2^32 and r64 < p.
    fn div_words(&self, digits: &mut [u64; Uint::BITS as usize / 64]) -> u64 {
        let mut carry: u64 = 0;
        for i in (0..digits.len()).rev() {
            let d = digits[i];
            if d == 0 && carry == 0 {
                continue;
            }
            let (mut q, r) = self.divmod_u64(d);
            if carry != 0 {
                let (cq, cr) = self.divmod_u64(carry * self.r64 + r);
                q += carry * self.q64 + cq;
                carry = cr;
            } else {
                carry = r;
            }
            digits[i] = q;
        }
        carry
    }
}
