//! Command line front end for the factoring library.

use std::str::FromStr;

use qsfactor::{factor, Preferences, Uint, Verbosity};

const MAX_BITS: u32 = 420;

fn main() {
    let arg = arguments::parse(std::env::args()).unwrap();
    if arg.get::<bool>("help").is_some() || arg.orphans.is_empty() {
        eprintln!("Usage: qsf [OPTIONS] NUMBER...");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --help                 show this help");
        eprintln!("  --threads N            worker threads (0 = hardware default)");
        eprintln!("  --fb N                 factor base size override");
        eprintln!("  --interval N           sieve window length");
        eprintln!("  --percent P            sieve threshold percent (default 85)");
        eprintln!("  --multiplier K         small odd multiplier (0 = auto)");
        eprintln!("  --merge-limit N        structured elimination row cap");
        eprintln!("  --no-partials          disable large prime relations");
        eprintln!("  --double               enable double large primes");
        eprintln!("  --timeout SECS         sieve time budget");
        eprintln!("  --report SECS          progress report interval");
        eprintln!("  --v LEVEL              silent|info|verbose|debug");
        return;
    }
    let mut prefs = Preferences::default();
    prefs.verbosity = Verbosity::Info;
    if let Some(v) = arg.get::<String>("v") {
        match Verbosity::from_str(&v) {
            Ok(v) => prefs.verbosity = v,
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
    }
    if let Some(t) = arg.get::<usize>("threads") {
        prefs.threads = t;
    }
    prefs.fb_size = arg.get::<u32>("fb");
    prefs.interval_size = arg.get::<usize>("interval");
    prefs.lower_bound_percent = arg.get::<u32>("percent");
    if let Some(k) = arg.get::<u32>("multiplier") {
        prefs.multiplier = k;
    }
    prefs.merge_limit = arg.get::<usize>("merge-limit");
    if arg.get::<bool>("no-partials").is_some() {
        prefs.process_partial_relations = false;
    }
    if arg.get::<bool>("double").is_some() {
        prefs.two_large_primes = true;
    }
    prefs.sieve_time_limit = arg.get::<f64>("timeout");
    prefs.reporting_interval = arg.get::<f64>("report");

    for number in &arg.orphans {
        let n = match Uint::from_str(number) {
            Ok(n) => n,
            Err(_) => {
                eprintln!("could not read decimal number {number:?}");
                std::process::exit(1);
            }
        };
        if n.bits() > MAX_BITS {
            eprintln!(
                "number size ({} bits) exceeds the {MAX_BITS} bit limit",
                n.bits()
            );
            std::process::exit(1);
        }
        let start = std::time::Instant::now();
        match factor(&n, &prefs) {
            Ok(fs) => {
                if prefs.verbose(Verbosity::Info) {
                    eprintln!(
                        "Factored {n} in {:.3}s",
                        start.elapsed().as_secs_f64()
                    );
                }
                for f in fs {
                    println!("{f}");
                }
            }
            Err(e) => {
                eprintln!("{number}: {e}");
                std::process::exit(1);
            }
        }
    }
}
