// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! The quadratic sieve driver: factor base selection, parallel window
//! sieving, relation collection, linear algebra and factor extraction.
//!
//! Bibliography:
//! Carl Pomerance, A Tale of Two Sieves
//! <https://www.ams.org/notices/199612/pomerance.pdf>
//! Robert D. Silverman, The multiple polynomial quadratic sieve,
//! Math. Comp. 48, 1987

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use crate::arith;
use crate::fbase::{self, FBase, UnexpectedFactor};
use crate::params;
use crate::relations::{self, RelationSet};
use crate::sieve::{SieveContext, SieveWindow};
use crate::{Error, Preferences, Uint, Verbosity};

// Retrying with a larger factor base is cheap compared to a failed
// sieve, so few attempts are needed.
const MAX_ATTEMPTS: u32 = 4;

// Backstop against sieving forever when parameters are hopeless.
const MAX_WINDOWS: u64 = 1 << 21;

/// Factor a composite n through the quadratic sieve. The returned pair
/// multiplies to n; both parts exceed 1.
pub fn qsieve(
    n: &Uint,
    prefs: &Preferences,
    tpool: Option<&rayon::ThreadPool>,
) -> Result<(Uint, Uint), Error> {
    let k = match prefs.multiplier {
        0 => {
            let (k, score) = fbase::select_multiplier(n);
            if prefs.verbose(Verbosity::Info) {
                eprintln!("Selected multiplier {k} (score {score:.2})");
            }
            k
        }
        k => k,
    };
    let mut fb_size = prefs
        .fb_size
        .unwrap_or_else(|| params::fb_size(params::decimal_digits(n)))
        .max(8);
    let mut last = Error::InsufficientRelations;
    for attempt in 0..MAX_ATTEMPTS {
        match qsieve_attempt(n, k, fb_size, prefs, tpool) {
            Ok(pq) => return Ok(pq),
            Err(Error::InsufficientRelations) => {
                last = Error::InsufficientRelations;
                fb_size += fb_size / 3 + 16;
                if prefs.verbose(Verbosity::Info) {
                    eprintln!(
                        "Not enough relations (attempt {}), growing factor base to {fb_size}",
                        attempt + 1
                    );
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(last)
}

fn qsieve_attempt(
    n: &Uint,
    k: u32,
    fb_size: u32,
    prefs: &Preferences,
    tpool: Option<&rayon::ThreadPool>,
) -> Result<(Uint, Uint), Error> {
    let nk = n * Uint::from(k as u64);
    let fbase = match FBase::new(&nk, fb_size, k) {
        Ok(fb) => fb,
        Err(UnexpectedFactor(p)) => {
            // The builder skips divisors of the multiplier, so p
            // divides n itself.
            let p = Uint::from(p);
            debug_assert!((n % p).is_zero());
            return Ok((p, n / p));
        }
    };
    let nsqrt = arith::isqrt(nk);
    if nsqrt * nsqrt == nk && k == 1 {
        return Ok((nsqrt, n / nsqrt));
    }

    let maxprime = fbase.bound() as u64;
    let maxlarge = (maxprime * params::large_prime_factor(&nk))
        .min(maxprime * maxprime / params::COFACTOR_CUTOFF)
        .max(1);
    let maxdouble = if prefs.two_large_primes {
        maxprime * maxprime * 16
    } else {
        0
    };
    let wlen = params::interval_size(prefs.interval_size);
    let merge_limit = prefs.merge_limit.unwrap_or(8);
    let target = fbase.len() + params::surplus(merge_limit);
    if prefs.verbose(Verbosity::Info) {
        eprintln!(
            "Quadratic sieve for {n} (k={k}): {} primes, bound {}, window {}k, large prime bound {maxlarge}",
            fbase.len(),
            fbase.bound(),
            wlen >> 10,
        );
    }
    let ctx = SieveContext::new(
        nk,
        nsqrt,
        fbase,
        wlen,
        maxlarge,
        maxdouble,
        prefs.lower_bound_percent.unwrap_or(85),
        prefs.threshold_exponent.unwrap_or(1.0),
    );

    let rels = RwLock::new(RelationSet::new(nk, prefs.process_partial_relations));
    let done = AtomicBool::new(false);
    let timed_out = AtomicBool::new(false);
    let next_window = AtomicU64::new(0);
    let report_slot = AtomicU64::new(0);
    let start = Instant::now();
    let report_every = prefs.reporting_interval.unwrap_or(5.0);

    let worker = |_wid: usize| {
        let mut window = SieveWindow::new(ctx.wlen);
        let mut out = vec![];
        loop {
            if done.load(Ordering::SeqCst) {
                return;
            }
            if prefs.should_abort() {
                // Propagate so siblings drop their current window too.
                done.store(true, Ordering::SeqCst);
                return;
            }
            if let Some(limit) = prefs.sieve_time_limit {
                if start.elapsed().as_secs_f64() >= limit {
                    timed_out.store(true, Ordering::SeqCst);
                    done.store(true, Ordering::SeqCst);
                    return;
                }
            }
            // Interleave the forward and backward streams.
            let w = next_window.fetch_add(1, Ordering::Relaxed);
            if w >= MAX_WINDOWS {
                done.store(true, Ordering::SeqCst);
                return;
            }
            let base = if w % 2 == 0 {
                (w as i64 / 2) * ctx.wlen as i64
            } else {
                -((w as i64 / 2 + 1) * ctx.wlen as i64)
            };
            out.clear();
            window.sieve(&ctx, base, Some(&done), &mut out);
            let mut store = rels.write().unwrap();
            for (r, pq) in out.drain(..) {
                debug_assert!(r.verify(&ctx.nk), "invalid sieve relation x={}", r.x);
                store.add(r, pq);
            }
            if store.len() >= target {
                done.store(true, Ordering::SeqCst);
            }
            if prefs.verbose(Verbosity::Info) {
                let elapsed = start.elapsed().as_secs_f64();
                let slot = (elapsed / report_every) as u64;
                if slot > report_slot.swap(slot, Ordering::Relaxed) {
                    store.log_progress(format!(
                        "[{elapsed:.1}s] sieved {}M",
                        (w + 1) * ctx.wlen as u64 >> 20
                    ));
                }
            }
        }
    };

    match tpool {
        Some(pool) => pool.install(|| {
            let threads = pool.current_num_threads();
            let worker = &worker;
            rayon::scope(|s| {
                for wid in 0..threads {
                    s.spawn(move |_| worker(wid));
                }
            })
        }),
        None => worker(0),
    }

    if prefs.should_abort() {
        return Err(Error::Cancelled(vec![]));
    }
    if timed_out.load(Ordering::SeqCst) {
        // Treated like a failed attempt: the caller may retry with a
        // larger factor base before giving up.
        return Err(Error::InsufficientRelations);
    }
    let store = rels.into_inner().unwrap();
    if prefs.verbose(Verbosity::Info) {
        store.log_progress(format!("[{:.1}s]", start.elapsed().as_secs_f64()));
    }
    let collected = store.into_inner();
    if collected.len() < ctx.fbase.len() / 2 {
        return Err(Error::InsufficientRelations);
    }
    match relations::final_step(n, &collected, merge_limit, prefs.verbosity) {
        Some((p, q)) => Ok((p, q)),
        None => Err(Error::InsufficientRelations),
    }
}
