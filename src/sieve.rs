//! The block sieve.
//!
//! For x = sqrt(n) + j, Q(x) = x^2 - n is divisible by p exactly when
//! x mod p is one of the two square roots of n, so the divisible j
//! form two arithmetic progressions of stride p. Each window adds
//! ceil(10 ln p) at every hit position of every factor base prime and
//! trial-divides the positions whose counter clears a threshold.
//!
//! Most sieve work comes from the smallest primes: their combined hit
//! pattern repeats with period lcm(2,3,5,7,11,13) = 30030 and is
//! precomputed once, then copied into each window with a rotation.
//! Larger small primes would blow the cycle length up past any usable
//! buffer and stay in the per-prime loop.

use std::sync::atomic::{AtomicBool, Ordering};

use num_traits::ToPrimitive;

use crate::arith::ln_uint;
use crate::fbase::FBase;
use crate::params::LOG_SCALE;
use crate::pollard_rho;
use crate::pseudoprime::is_prime64;
use crate::relations::Relation;
use crate::{Int, Uint};

// lcm of the presieved primes 2, 3, 5, 7, 11, 13.
const TINY_CYCLE: usize = 30030;
const TINY_BOUND: u32 = 13;

/// Shared read-only sieve state for one factorization attempt.
pub struct SieveContext {
    pub nk: Uint,
    pub nsqrt: Uint,
    pub fbase: FBase,
    // sqrt(nk) mod p for each factor base prime.
    nsqrt_mod: Vec<u32>,
    pub wlen: usize,
    pub maxlarge: u64,
    // Bound for double large prime cofactors; 0 disables them.
    pub maxdouble: u64,
    pub percent: u32,
    pub threshold_exponent: f64,
    // Factor base entries covered by the precomputed cycle.
    tiny_count: usize,
    tiny: Vec<u16>,
}

impl SieveContext {
    pub fn new(
        nk: Uint,
        nsqrt: Uint,
        fbase: FBase,
        wlen: usize,
        maxlarge: u64,
        maxdouble: u64,
        percent: u32,
        threshold_exponent: f64,
    ) -> SieveContext {
        let nsqrt_mod: Vec<u32> = (0..fbase.len())
            .map(|i| fbase.div(i).mod_uint(&nsqrt) as u32)
            .collect();
        let tiny_count = fbase
            .primes
            .iter()
            .position(|&p| p > TINY_BOUND)
            .unwrap_or(fbase.len());
        let mut tiny = vec![0u16; TINY_CYCLE];
        for idx in 0..tiny_count {
            let p = fbase.p(idx);
            let r = fbase.r(idx);
            let logp = fbase.log(idx) as u16;
            let rp = fbase.div(idx).mod_uint(&nsqrt) as u32;
            let mut starts = [(r + p - rp % p) % p, 0];
            let mut nroots = 1;
            let r2 = p - r;
            if r2 != r {
                starts[1] = (r2 + p - rp % p) % p;
                nroots = 2;
            }
            for &s in &starts[..nroots] {
                let mut m = s as usize;
                while m < TINY_CYCLE {
                    tiny[m] += logp;
                    m += p as usize;
                }
            }
        }
        SieveContext {
            nk,
            nsqrt,
            fbase,
            nsqrt_mod,
            wlen,
            maxlarge,
            maxdouble,
            percent,
            threshold_exponent,
            tiny_count,
            tiny,
        }
    }

    /// Counter threshold for the window starting at `base`: a fraction
    /// of the expected log of Q at the far end of the window, lowered
    /// by the large prime allowance.
    pub fn threshold(&self, base: i64) -> u16 {
        let span = base.unsigned_abs() + self.wlen as u64;
        let qln = ln_uint(&self.nsqrt) + (2.0 * span as f64).ln();
        let t = LOG_SCALE * (self.percent as f64 / 100.0) * qln
            - LOG_SCALE * self.threshold_exponent * (self.maxlarge.max(2) as f64).ln();
        t.max(1.0) as u16
    }
}

/// Worker-owned scratch: the counter buffer and the candidate list.
pub struct SieveWindow {
    counters: Vec<u16>,
    hits: Vec<u32>,
}

impl SieveWindow {
    pub fn new(wlen: usize) -> Self {
        SieveWindow {
            counters: vec![0; wlen],
            hits: Vec::with_capacity(256),
        }
    }

    /// Sieve the window of j in [base, base + wlen) and append the
    /// confirmed relations to `out` together with the cofactor split
    /// for double large primes. A set `stop` flag makes the worker
    /// drop the window mid-sieve.
    pub fn sieve(
        &mut self,
        ctx: &SieveContext,
        base: i64,
        stop: Option<&AtomicBool>,
        out: &mut Vec<(Relation, Option<(u64, u64)>)>,
    ) {
        let wlen = ctx.wlen;
        debug_assert!(self.counters.len() == wlen);
        if base < 0 && Uint::from(base.unsigned_abs()) >= ctx.nsqrt {
            // Window entirely left of x = 0; nothing to sieve.
            return;
        }
        // Rotate the tiny prime cycle into the buffer.
        let start = base.rem_euclid(TINY_CYCLE as i64) as usize;
        let mut filled = 0;
        let mut off = start;
        while filled < wlen {
            let n = (wlen - filled).min(TINY_CYCLE - off);
            self.counters[filled..filled + n].copy_from_slice(&ctx.tiny[off..off + n]);
            filled += n;
            off = (off + n) % TINY_CYCLE;
        }
        // Per-prime log adds for the rest of the base.
        for idx in ctx.tiny_count..ctx.fbase.len() {
            if idx & 0xfff == 0 {
                if let Some(flag) = stop {
                    if flag.load(Ordering::Relaxed) {
                        return;
                    }
                }
            }
            let p = ctx.fbase.p(idx);
            let r = ctx.fbase.r(idx);
            let logp = ctx.fbase.log(idx) as u16;
            let div = ctx.fbase.div(idx);
            let rp = ctx.nsqrt_mod[idx];
            // j = root - sqrt(nk) - base (mod p)
            let s1 = div.mod_i64(r as i64 - rp as i64 - base) as usize;
            let mut j = s1;
            while j < wlen {
                self.counters[j] += logp;
                j += p as usize;
            }
            let r2 = p - r;
            if r2 != r {
                let s2 = div.mod_i64(r2 as i64 - rp as i64 - base) as usize;
                let mut j = s2;
                while j < wlen {
                    self.counters[j] += logp;
                    j += p as usize;
                }
            }
        }
        // Threshold scan, eight counters at a time.
        let t = ctx.threshold(base);
        self.hits.clear();
        let thr = wide::u16x8::splat(t - 1);
        let mut i = 0;
        while i + 8 <= wlen {
            let lanes: [u16; 8] = self.counters[i..i + 8].try_into().unwrap();
            if wide::u16x8::new(lanes).max(thr) != thr {
                for (k, &c) in lanes.iter().enumerate() {
                    if c >= t {
                        self.hits.push((i + k) as u32);
                    }
                }
            }
            i += 8;
        }
        while i < wlen {
            if self.counters[i] >= t {
                self.hits.push(i as u32);
            }
            i += 1;
        }
        for hi in 0..self.hits.len() {
            let j = self.hits[hi];
            if let Some(res) = confirm(ctx, base + j as i64) {
                out.push(res);
            }
        }
    }
}

// Trial-divide Q(sqrt(nk) + j) over the factor base and classify the
// residue: 1 is a full relation, a prime below the large prime bound
// is a partial, a composite below the double bound splits into a
// two-prime partial. Everything else is discarded.
fn confirm(ctx: &SieveContext, j: i64) -> Option<(Relation, Option<(u64, u64)>)> {
    let x = Int::from_bits(ctx.nsqrt) + Int::from(j);
    if !x.is_positive() {
        return None;
    }
    let q: Int = x * x - Int::from_bits(ctx.nk);
    if q == Int::ZERO {
        return None;
    }
    let mut factors: Vec<(i64, u64)> = Vec::with_capacity(20);
    if q.is_negative() {
        factors.push((-1, 1));
    }
    let mut cof: Uint = q.abs().to_bits();
    for idx in 0..ctx.fbase.len() {
        let p = ctx.fbase.p(idx);
        let r = ctx.fbase.r(idx);
        let div = ctx.fbase.div(idx);
        // x = sqrt(nk) + j must sit on one of the two root classes.
        let mut t = ctx.nsqrt_mod[idx] as u64 + div.mod_i64(j);
        if t >= p as u64 {
            t -= p as u64;
        }
        if t as u32 != r && t as u32 != p - r {
            continue;
        }
        let mut exp = 0u64;
        loop {
            let (quo, rem) = div.divmod_uint(&cof);
            if rem != 0 {
                break;
            }
            cof = quo;
            exp += 1;
        }
        debug_assert!(exp > 0, "sieve hit must divide");
        if exp > 0 {
            factors.push((p as i64, exp));
        }
    }
    let cofactor = cof.to_u64()?;
    let xmod = x.to_bits() % ctx.nk;
    let rel = |cofactor| Relation {
        x: xmod,
        cofactor,
        factors: factors.clone(),
    };
    if cofactor == 1 {
        return Some((rel(1), None));
    }
    if cofactor <= ctx.maxlarge {
        // No factor base divisor is left, and maxlarge is below the
        // squared bound, so the cofactor is prime.
        return Some((rel(cofactor), None));
    }
    let bb = ctx.fbase.bound() as u64;
    if ctx.maxdouble > 0 && cofactor <= ctx.maxdouble && cofactor > bb * bb {
        if is_prime64(cofactor) {
            return None;
        }
        let (p, q) = pollard_rho::rho_semiprime(cofactor)?;
        if p <= ctx.maxlarge && q <= ctx.maxlarge {
            return Some((rel(cofactor), Some((p, q))));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fbase::FBase;
    use crate::params;

    fn context(n: u64, fb_size: u32, percent: u32) -> SieveContext {
        let nk = Uint::from(n);
        let fbase = FBase::new(&nk, fb_size, 1).unwrap();
        let nsqrt = crate::arith::isqrt(nk);
        let maxlarge = fbase.bound() as u64 * 4;
        SieveContext::new(
            nk,
            nsqrt,
            fbase,
            params::interval_size(Some(32 * 1024)),
            maxlarge,
            0,
            percent,
            1.0,
        )
    }

    #[test]
    fn test_sieve_window_relations() {
        // 15347 = 103 * 149, the classic worked example: Q(124) = 29.
        let ctx = context(15347, 12, 1);
        let mut w = SieveWindow::new(ctx.wlen);
        let mut out = vec![];
        w.sieve(&ctx, 0, None, &mut out);
        assert!(!out.is_empty());
        let mut found_124 = false;
        for (r, pq) in &out {
            assert!(pq.is_none());
            assert!(r.verify(&ctx.nk), "invalid relation x={}", r.x);
            if r.x == Uint::from(124u64) {
                found_124 = true;
                assert_eq!(r.cofactor, 1);
            }
        }
        assert!(found_124, "Q(124) = 29 must be a full relation");
        // The negative stream produces relations carrying the sign bit.
        let mut out_neg = vec![];
        w.sieve(&ctx, -(ctx.wlen as i64), None, &mut out_neg);
        for (r, _) in &out_neg {
            assert!(r.verify(&ctx.nk), "invalid relation x={}", r.x);
        }
    }

    #[test]
    fn test_sieve_counters_match_naive() {
        // The rotated tiny cycle plus per-prime loop must agree with
        // a direct evaluation of Q's divisibility.
        let ctx = context(10023859281455311421, 40, 100);
        let mut w = SieveWindow::new(ctx.wlen);
        let mut out = vec![];
        for base in [0i64, ctx.wlen as i64, -(ctx.wlen as i64), 3 * ctx.wlen as i64] {
            w.sieve(&ctx, base, None, &mut out);
            for j in [0usize, 1, 97, 1000, ctx.wlen - 1] {
                let x = Int::from_bits(ctx.nsqrt) + Int::from(base + j as i64);
                let q = (x * x - Int::from_bits(ctx.nk)).abs().to_bits();
                let mut expect = 0u16;
                for idx in 0..ctx.fbase.len() {
                    let div = ctx.fbase.div(idx);
                    if div.mod_uint(&q) == 0 {
                        expect += ctx.fbase.log(idx) as u16;
                    }
                }
                assert_eq!(
                    w.counters[j], expect,
                    "counter mismatch at base={base} j={j}"
                );
            }
        }
    }

    #[test]
    fn test_partial_relations_emitted() {
        let ctx = context(15347, 8, 1);
        let mut w = SieveWindow::new(ctx.wlen);
        let mut out = vec![];
        w.sieve(&ctx, 0, None, &mut out);
        let partials: Vec<_> = out.iter().filter(|(r, _)| r.cofactor > 1).collect();
        for (r, _) in &partials {
            assert!(r.cofactor <= ctx.maxlarge);
            assert!(is_prime64(r.cofactor));
            assert!(r.verify(&ctx.nk));
        }
    }
}
