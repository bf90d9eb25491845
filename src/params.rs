use crate::Uint;

/// Log-approximation scale: a factor base entry contributes
/// ceil(10 ln p) to a 16-bit sieve counter.
pub const LOG_SCALE: f64 = 10.0;

/// Default sieve window in bytes of counters.
pub const DEFAULT_INTERVAL: usize = 200_000;

/// Cap on the large prime bound relative to the squared base bound.
pub const COFACTOR_CUTOFF: u64 = 16;

// Factor base size by decimal digit count, interpolated linearly
// between anchors and extrapolated past the last one.
const FB_ANCHORS: &[(u32, u32)] = &[
    (1, 2),
    (6, 5),
    (10, 30),
    (20, 60),
    (30, 500),
    (40, 1200),
    (50, 5000),
    (60, 12000),
    (90, 60000),
];

pub fn fb_size(digits: u32) -> u32 {
    let (last_d, last_s) = *FB_ANCHORS.last().unwrap();
    if digits >= last_d {
        let (prev_d, prev_s) = FB_ANCHORS[FB_ANCHORS.len() - 2];
        let slope = (last_s - prev_s) / (last_d - prev_d);
        return last_s + (digits - last_d) * slope;
    }
    let mut lo = FB_ANCHORS[0];
    for &(d, s) in FB_ANCHORS {
        if d >= digits {
            if d == digits || lo.0 == d {
                return s;
            }
            // Round up between anchors.
            let num = (digits - lo.0) * (s - lo.1);
            let den = d - lo.0;
            return lo.1 + (num + den - 1) / den;
        }
        lo = (d, s);
    }
    unreachable!()
}

/// Window length clamped to 32 KiB..1 MiB and rounded to a SIMD lane
/// multiple.
pub fn interval_size(requested: Option<usize>) -> usize {
    let w = requested.unwrap_or(DEFAULT_INTERVAL);
    w.clamp(32 * 1024, 1 << 20) & !15
}

/// Ratio of the large prime bound to the factor base bound.
pub fn large_prime_factor(n: &Uint) -> u64 {
    match n.bits() {
        0..=63 => 1,
        64..=127 => 20,
        128..=191 => 50,
        192..=255 => 100,
        256..=319 => 200,
        _ => 300,
    }
}

/// Extra relations collected beyond the factor base size.
pub fn surplus(merge_limit: usize) -> usize {
    (16 + 2 * merge_limit).clamp(10, 64)
}

pub fn decimal_digits(n: &Uint) -> u32 {
    n.to_string().len() as u32
}

#[test]
fn test_fb_size() {
    assert_eq!(fb_size(1), 2);
    assert_eq!(fb_size(6), 5);
    assert_eq!(fb_size(10), 30);
    assert_eq!(fb_size(20), 60);
    assert_eq!(fb_size(30), 500);
    assert_eq!(fb_size(90), 60000);
    // Monotone between anchors, rounded up.
    let mut prev = 0;
    for d in 1..=120 {
        let s = fb_size(d);
        assert!(s >= prev, "fb_size not monotone at {d}");
        prev = s;
    }
    assert_eq!(fb_size(25), 280);
    assert_eq!(fb_size(120), 60000 + 30 * 1600);
}

#[test]
fn test_interval_size() {
    assert_eq!(interval_size(None), DEFAULT_INTERVAL);
    assert_eq!(interval_size(Some(1000)), 32 * 1024);
    assert_eq!(interval_size(Some(1 << 24)), 1 << 20);
    assert_eq!(interval_size(Some(100_001)) % 16, 0);
}

#[test]
fn test_digits() {
    assert_eq!(decimal_digits(&Uint::from(1u64)), 1);
    assert_eq!(decimal_digits(&Uint::from(9_999u64)), 4);
    assert_eq!(decimal_digits(&Uint::from(10023859281455311421u64)), 20);
}
