// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Montgomery form arithmetic for 64-bit and multiword odd moduli.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::uint128::{self, U128};
use crate::Uint;

/// Returns minv such that m*minv = -1 mod 2^64.
///
/// Newton iteration on the 2-adic inverse: the seed 3m ^ 2 is correct
/// to 5 bits and each doubling step squares the precision, so five
/// doublings reach the full word.
pub fn inv2adic(m: u64) -> u64 {
    debug_assert!(m & 1 == 1);
    let mut x = m.wrapping_mul(3) ^ 2;
    for _ in 0..5 {
        x = x.wrapping_mul(2u64.wrapping_sub(m.wrapping_mul(x)));
    }
    debug_assert!(m.wrapping_mul(x) == 1);
    x.wrapping_neg()
}

/// Montgomery reducer for a fixed odd 64-bit modulus.
///
/// Residues hold a*R mod m with R = 2^64 and always satisfy `0 <= v < m`.
#[derive(Clone, Copy, Debug)]
pub struct Montgomery64 {
    pub m: u64,
    // -m^-1 mod 2^64
    minv: u64,
    // R mod m
    r: u64,
    // R^2 mod m
    r2: u64,
}

impl Montgomery64 {
    pub fn new(m: u64) -> Montgomery64 {
        assert!(m & 1 == 1 && m > 1);
        let minv = inv2adic(m);
        // 2^64 mod m; an odd m never divides the radix.
        let r = (u64::MAX % m) + 1;
        let r2 = uint128::mulmod(r, r, m);
        Montgomery64 { m, minv, r, r2 }
    }

    /// The residue of 1.
    #[inline]
    pub fn one(&self) -> u64 {
        self.r
    }

    /// The residue of -1.
    #[inline]
    pub fn minus_one(&self) -> u64 {
        self.m - self.r
    }

    #[inline]
    pub fn to_mg(&self, x: u64) -> u64 {
        debug_assert!(x < self.m);
        self.redc(U128::wide_mul(x, self.r2))
    }

    #[inline]
    pub fn from_mg(&self, x: u64) -> u64 {
        self.redc(U128::from_u64(x))
    }

    #[inline]
    pub fn mul(&self, x: u64, y: u64) -> u64 {
        self.redc(U128::wide_mul(x, y))
    }

    #[inline]
    pub fn sq(&self, x: u64) -> u64 {
        self.redc(U128::wide_mul(x, x))
    }

    #[inline]
    pub fn add(&self, x: u64, y: u64) -> u64 {
        uint128::mod_add(x, y, self.m)
    }

    #[inline]
    pub fn sub(&self, x: u64, y: u64) -> u64 {
        uint128::mod_sub(x, y, self.m)
    }

    /// x^e where x is a residue; the result is a residue.
    pub fn pow(&self, x: u64, e: u64) -> u64 {
        let mut res = self.one();
        let mut sq = x;
        let mut e = e;
        while e > 0 {
            if e & 1 == 1 {
                res = self.mul(res, sq);
            }
            sq = self.sq(sq);
            e >>= 1;
        }
        res
    }

    /// Montgomery reduction t/R mod m, one quotient digit per 32-bit
    /// limb of t so the accumulator never outgrows five limbs.
    fn redc(&self, t: U128) -> u64 {
        let mut acc = [t.limb(0), t.limb(1), t.limb(2), t.limb(3), 0u32];
        let k0 = self.minv as u32;
        let ml = [self.m as u32, (self.m >> 32) as u32];
        for i in 0..2 {
            let q = acc[i].wrapping_mul(k0) as u64;
            let mut carry: u64 = 0;
            for (j, &mw) in ml.iter().enumerate() {
                let s = acc[i + j] as u64 + q * mw as u64 + carry;
                acc[i + j] = s as u32;
                carry = s >> 32;
            }
            let mut j = i + 2;
            while carry > 0 && j < 5 {
                let s = acc[j] as u64 + carry;
                acc[j] = s as u32;
                carry = s >> 32;
                j += 1;
            }
            debug_assert!(acc[i] == 0);
        }
        let res = ((acc[3] as u64) << 32) | acc[2] as u64;
        if acc[4] != 0 || res >= self.m {
            res.wrapping_sub(self.m)
        } else {
            res
        }
    }
}

/// Modular multiplication strategy for a 64-bit modulus. The sieve and
/// the primality tests only depend on this capability; the reducer owns
/// the modulus.
pub enum Reducer64 {
    /// Products of reduced values fit a single word.
    Native64(u64),
    /// Odd wide modulus: residue domain arithmetic.
    Montgomery(Montgomery64),
    /// Even wide modulus: full product and 128/64 division.
    Wide(u64),
}

impl Reducer64 {
    pub fn new(m: u64) -> Reducer64 {
        if m <= u32::MAX as u64 {
            Reducer64::Native64(m)
        } else if m & 1 == 1 {
            Reducer64::Montgomery(Montgomery64::new(m))
        } else {
            Reducer64::Wide(m)
        }
    }

    pub fn pow_mod(&self, a: u64, e: u64) -> u64 {
        match self {
            Reducer64::Native64(m) => {
                let m = *m;
                if m == 1 {
                    return 0;
                }
                let mut res: u64 = 1;
                let mut sq = a % m;
                let mut e = e;
                while e > 0 {
                    if e & 1 == 1 {
                        res = res * sq % m;
                    }
                    sq = sq * sq % m;
                    e >>= 1;
                }
                res
            }
            Reducer64::Montgomery(mg) => mg.from_mg(mg.pow(mg.to_mg(a % mg.m), e)),
            Reducer64::Wide(m) => uint128::pow_mod(a, e, *m),
        }
    }
}

/// a^e mod m for any m > 0, dispatching through the reducer variants.
pub fn pow_mod_u64(a: u64, e: u64, m: u64) -> u64 {
    assert!(m > 0);
    Reducer64::new(m).pow_mod(a, e)
}

// Repeated exponentiations modulo the same odd wide modulus (witness
// loops of the primality test) share reducer constants through a
// process-wide cache. The cache is bounded; teardown is process exit.
static MG_CACHE: OnceLock<Mutex<HashMap<u64, Montgomery64>>> = OnceLock::new();

pub fn shared_montgomery(m: u64) -> Montgomery64 {
    let cache = MG_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = cache.lock().unwrap();
    if map.len() > 256 {
        map.clear();
    }
    *map.entry(m).or_insert_with(|| Montgomery64::new(m))
}

/// Montgomery arithmetic for multiword odd moduli.
///
/// The radix is R = 2^(64k) where k is the modulus word count; the
/// reducer owns all derived constants and outlives its residues.
#[derive(Clone)]
pub struct ZmodN {
    pub n: Uint,
    // -n^-1 mod R
    ninv: Uint,
    // Word count of the auxiliary base R = 2^64k
    k: u32,
    // R mod n
    r: Uint,
    // R^2 mod n
    r2: Uint,
}

impl ZmodN {
    pub fn new(n: Uint) -> ZmodN {
        assert!(n.bit(0), "modulus must be odd");
        assert!(n.bits() < Uint::BITS / 2);
        let k = (n.bits() + 63) / 64;
        let rhalf = Uint::ONE << (32 * k);
        let r = (rhalf * rhalf) % n;
        let r2 = (r * r) % n;
        // 2-adic inverse by the same doubling scheme as the word case.
        let two = Uint::from(2u64);
        let mut x = n.wrapping_mul(Uint::from(3u64)) ^ two;
        loop {
            let e = n.wrapping_mul(x) - Uint::ONE;
            if e.trailing_zeros() >= 64 * k {
                break;
            }
            x = x.wrapping_mul(two.wrapping_sub(n.wrapping_mul(x)));
        }
        // ninv = R - (x mod R)
        let mask_bits = 64 * k;
        let x = if mask_bits < Uint::BITS {
            x - ((x >> mask_bits) << mask_bits)
        } else {
            x
        };
        let ninv = if mask_bits < Uint::BITS {
            (Uint::ONE << mask_bits) - x
        } else {
            x.wrapping_neg()
        };
        ZmodN { n, ninv, k, r, r2 }
    }

    pub fn one(&self) -> Uint {
        self.r
    }

    pub fn from_int(&self, x: Uint) -> Uint {
        debug_assert!(x < self.n);
        self.redc(mul_words(&x, &self.r2, self.k))
    }

    pub fn to_int(&self, x: Uint) -> Uint {
        self.redc(x)
    }

    pub fn mul(&self, x: Uint, y: Uint) -> Uint {
        debug_assert!(x < self.n && y < self.n);
        self.redc(mul_words(&x, &y, self.k))
    }

    pub fn sq(&self, x: Uint) -> Uint {
        self.mul(x, x)
    }

    pub fn add(&self, x: Uint, y: Uint) -> Uint {
        let mut s = x + y;
        if s >= self.n {
            s -= self.n;
        }
        s
    }

    pub fn sub(&self, x: Uint, y: Uint) -> Uint {
        if x >= y {
            x - y
        } else {
            x + self.n - y
        }
    }

    /// x^e for a residue x; the result is a residue.
    pub fn pow(&self, x: Uint, e: &Uint) -> Uint {
        let mut res = self.one();
        let mut sq = x;
        for i in 0..e.bits() {
            if e.bit(i) {
                res = self.mul(res, sq);
            }
            sq = self.sq(sq);
        }
        res
    }

    fn redc(&self, t: Uint) -> Uint {
        debug_assert!(t < (self.n << (64 * self.k)));
        // q = (t mod R) * ninv mod R, then (t + q n) / R.
        let q = {
            let ql = mul_words(&t, &self.ninv, self.k);
            let mut digits = *ql.digits();
            for d in digits.iter_mut().skip(self.k as usize) {
                *d = 0;
            }
            Uint::from_digits(digits)
        };
        let t_qn = t + mul_words(&q, &self.n, self.k);
        // Exact division by R: shift the word window down.
        let src = t_qn.digits();
        let mut out = [0u64; Uint::BITS as usize / 64];
        for i in 0..=self.k as usize {
            if i + self.k as usize > src.len() - 1 {
                break;
            }
            out[i] = src[i + self.k as usize];
        }
        let mut res = Uint::from_digits(out);
        if res >= self.n {
            res -= self.n;
        }
        debug_assert!(res < self.n);
        res
    }
}

// Product of the low `sz` words of x and y; the result must fit the
// Uint width (guaranteed since both factors are below 2^(64 sz) and
// 2 sz words are available).
fn mul_words(x: &Uint, y: &Uint, sz: u32) -> Uint {
    let xd = x.digits();
    let yd = y.digits();
    let sz = sz as usize;
    let mut z = [0u64; Uint::BITS as usize / 64];
    for i in 0..sz {
        if xd[i] == 0 {
            continue;
        }
        let mut carry: u64 = 0;
        for j in 0..sz {
            // Two-word product via the limb kernel.
            let p = U128::wide_mul(xd[i], yd[j]);
            let (lo, c1) = z[i + j].overflowing_add(p.lo64());
            let (lo, c2) = lo.overflowing_add(carry);
            z[i + j] = lo;
            carry = p.hi64() + c1 as u64 + c2 as u64;
        }
        let (s, c) = z[i + sz].overflowing_add(carry);
        z[i + sz] = s;
        if c && i + sz + 1 < z.len() {
            z[i + sz + 1] += 1;
        }
    }
    Uint::from_digits(z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_inv2adic() {
        for m in [1u64, 3, 5, 7, 0xffff_ffff, (1 << 63) + 11, u64::MAX] {
            let minv = inv2adic(m);
            // m * (-m^-1) = -1 mod 2^64
            assert_eq!(m.wrapping_mul(minv), u64::MAX);
            assert_eq!(m.wrapping_mul(minv.wrapping_neg()), 1);
        }
    }

    #[test]
    fn test_montgomery64_roundtrip() {
        let ms: &[u64] = &[
            10023859281455311421,
            3267000013,
            (1 << 62) + 1,
            u64::MAX - 58,
            1000000007,
        ];
        for &m in ms {
            let mg = Montgomery64::new(m);
            for a in (0..5000u64).map(|i| i.wrapping_mul(0x9e37_79b9_7f4a_7c15) % m) {
                assert_eq!(mg.from_mg(mg.to_mg(a)), a, "m={m} a={a}");
            }
        }
    }

    #[test]
    fn test_montgomery64_mul() {
        let m = 10023859281455311421u64;
        let mg = Montgomery64::new(m);
        let mut a = 0x1234_5678_9abc_def1 % m;
        let mut b = 0xfedc_ba98_7654_3219 % m;
        for _ in 0..1000 {
            let expect = (a as u128 * b as u128 % m as u128) as u64;
            assert_eq!(mg.from_mg(mg.mul(mg.to_mg(a), mg.to_mg(b))), expect);
            a = a.wrapping_mul(3) % m;
            b = b.wrapping_add(0x1_0000_0007) % m;
        }
        assert_eq!(mg.from_mg(mg.one()), 1);
        assert_eq!(mg.from_mg(mg.minus_one()), m - 1);
        // Addition and subtraction act directly on residues.
        let x = mg.to_mg(123456789);
        let y = mg.to_mg(987654321);
        assert_eq!(mg.from_mg(mg.add(x, y)), 123456789 + 987654321);
        assert_eq!(mg.from_mg(mg.sub(x, y)), m - (987654321 - 123456789));
        assert_eq!(mg.add(mg.minus_one(), mg.one()), 0);
    }

    #[test]
    fn test_pow_mod_u64() {
        // Odd wide modulus: Montgomery path.
        let p = 10023859281455311457u64; // not prime, exercises generic exponent
        assert_eq!(pow_mod_u64(2, 64, p), (1u128 << 64).rem_euclid(p as u128) as u64);
        // Fermat on 64-bit primes.
        for &p in &[3267000013u64, 7660450463, u64::MAX - 58] {
            for a in 2..30u64 {
                assert_eq!(pow_mod_u64(a, p - 1, p), 1, "a={a} p={p}");
            }
        }
        // Small modulus: native path.
        let mut expect: u64 = 1;
        for _ in 0..100 {
            expect = expect * 7 % 1000;
        }
        assert_eq!(pow_mod_u64(7, 100, 1000), expect);
        assert_eq!(pow_mod_u64(5, 3, 997), 125);
        // Even wide modulus: wide path.
        let m = (1u64 << 63) + 2;
        assert_eq!(
            pow_mod_u64(3, 5, m) as u128,
            3u128.pow(5) % m as u128
        );
    }

    #[test]
    fn test_zmodn() {
        let n = Uint::from_str("2953951639731214343967989360202131868064542471002037986749")
            .unwrap();
        let zn = ZmodN::new(n);
        let p = Uint::from_str("17917317351877").unwrap();
        let x = zn.from_int(p);
        assert_eq!(zn.to_int(x), p);
        assert_eq!(zn.to_int(zn.one()), Uint::ONE);
        // (p * p) mod n round trips through the residue domain.
        assert_eq!(zn.to_int(zn.mul(x, x)), (p * p) % n);
        // Fermat-style exponent: p^(2^64) has a plain binary expansion.
        let e = Uint::from(123456789u64);
        let expect = {
            let mut acc = Uint::ONE;
            let mut sq = p % n;
            for i in 0..e.bits() {
                if e.bit(i) {
                    acc = (acc * sq) % n;
                }
                sq = (sq * sq) % n;
            }
            acc
        };
        assert_eq!(zn.to_int(zn.pow(zn.from_int(p), &e)), expect);
    }

    #[test]
    fn test_zmodn_small_words() {
        // One-word and two-word moduli exercise the window shift.
        for s in ["10023859281455311421", "287288745765902964785862069919080712937"] {
            let n = Uint::from_str(s).unwrap();
            let zn = ZmodN::new(n);
            for a in 1..50u64 {
                let a = Uint::from(a * a * a + 11);
                assert_eq!(zn.to_int(zn.from_int(a % n)), a % n);
            }
        }
    }
}
