// Copyright 2024 the qsfactor authors. All rights reserved.
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

//! Relations describe an equation x^2 = product(pi^ki) mod n where
//! pi = -1 or a prime of the factor base, possibly times a large
//! prime cofactor.
//!
//! Partial relations (cofactor > 1) are edges of an undirected graph
//! whose vertices are large primes plus a sentinel vertex for 1. Every
//! cycle closed by a new edge multiplies out to one complete relation,
//! since each vertex on the cycle contributes its prime squared.

use std::collections::{HashMap, HashSet};

use num_integer::Integer;

use crate::arith::pow_mod;
use crate::matrix::{self, SparseMat};
use crate::{Uint, Verbosity};

#[derive(Clone, Debug)]
pub struct Relation {
    pub x: Uint,
    pub cofactor: u64,
    pub factors: Vec<(i64, u64)>, // -1 encodes the sign
}

impl Relation {
    pub fn verify(&self, n: &Uint) -> bool {
        let mut prod = Uint::from(self.cofactor) % n;
        for &(p, k) in self.factors.iter() {
            if p == -1 {
                if k % 2 == 1 {
                    prod = (n - prod) % n;
                }
            } else {
                debug_assert!(p > 0);
                prod = (prod * pow_mod(Uint::from(p as u64), Uint::from(k), *n)) % n;
            }
        }
        (self.x * self.x) % n == prod
    }
}

/// Collects complete relations and combines partial ones through the
/// large prime graph. Relation identity is the x value.
pub struct RelationSet {
    pub n: Uint,
    complete: Vec<Relation>,
    seen: HashSet<Uint>,
    graph: PartialGraph,
    process_partials: bool,
    pub n_full: usize,
    pub n_partial: usize,
    pub n_double: usize,
    pub n_cycle: usize,
}

impl RelationSet {
    pub fn new(n: Uint, process_partials: bool) -> Self {
        RelationSet {
            n,
            complete: vec![],
            seen: HashSet::new(),
            graph: PartialGraph::new(),
            process_partials,
            n_full: 0,
            n_partial: 0,
            n_double: 0,
            n_cycle: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.complete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.complete.is_empty()
    }

    pub fn into_inner(self) -> Vec<Relation> {
        self.complete
    }

    pub fn log_progress<S: AsRef<str>>(&self, prefix: S) {
        eprintln!(
            "{} found {} relations (smooth={} partial={} pp={} cycles={} pending={})",
            prefix.as_ref(),
            self.len(),
            self.n_full,
            self.n_partial,
            self.n_double,
            self.n_cycle,
            self.graph.pending(),
        )
    }

    /// Insert a sieve result. `pq` carries the split of a composite
    /// cofactor when double large primes are enabled.
    pub fn add(&mut self, r: Relation, pq: Option<(u64, u64)>) {
        if !self.seen.insert(r.x) {
            return;
        }
        if r.cofactor == 1 {
            self.n_full += 1;
            self.complete.push(r);
            return;
        }
        if !self.process_partials {
            return;
        }
        let (p, q) = match pq {
            Some((p, q)) => {
                self.n_double += 1;
                (p, q)
            }
            None => {
                self.n_partial += 1;
                (r.cofactor, 1)
            }
        };
        if p == q {
            // A square cofactor completes the relation on its own.
            let mut f = r.factors.clone();
            f.push((p as i64, 2));
            self.n_cycle += 1;
            self.complete.push(Relation {
                cofactor: 1,
                factors: f,
                ..r
            });
            return;
        }
        if let Some(full) = self.graph.insert(&self.n, r, p, q) {
            self.n_cycle += 1;
            self.complete.push(full);
        }
    }
}

// An edge of the large prime graph, labelled with the relation whose
// cofactor is the product of both endpoint primes.
struct GraphEdge {
    a: u32,
    b: u32,
    rel: Relation,
}

/// Spanning forest over large prime vertices with an edge arena.
/// Non-root vertices carry the arena id of the edge toward their
/// parent, so the path closing a cycle can be read off the parent
/// pointers directly.
struct PartialGraph {
    // cofactor -> vertex id; vertex 0 is the sentinel for 1.
    ids: HashMap<u64, u32>,
    labels: Vec<u64>,
    parent: Vec<u32>,
    size: Vec<u32>,
    up_edge: Vec<Option<u32>>,
    edges: Vec<GraphEdge>,
}

impl PartialGraph {
    fn new() -> Self {
        PartialGraph {
            ids: HashMap::new(),
            labels: vec![1],
            parent: vec![0],
            size: vec![1],
            up_edge: vec![None],
            edges: vec![],
        }
    }

    fn pending(&self) -> usize {
        self.edges.len()
    }

    fn vertex(&mut self, cofactor: u64) -> u32 {
        if cofactor == 1 {
            return 0;
        }
        if let Some(&v) = self.ids.get(&cofactor) {
            return v;
        }
        let v = self.labels.len() as u32;
        self.ids.insert(cofactor, v);
        self.labels.push(cofactor);
        self.parent.push(v);
        self.size.push(1);
        self.up_edge.push(None);
        v
    }

    fn root(&self, mut v: u32) -> u32 {
        while self.parent[v as usize] != v {
            v = self.parent[v as usize];
        }
        v
    }

    // Reverse the parent pointers along the path from v to its root,
    // making v the root of its tree.
    fn reroot(&mut self, v: u32) {
        let mut cur = v;
        let mut prev: Option<(u32, u32)> = None;
        loop {
            let next = self.parent[cur as usize];
            let edge = self.up_edge[cur as usize];
            match prev {
                None => {
                    self.parent[cur as usize] = cur;
                    self.up_edge[cur as usize] = None;
                }
                Some((np, ne)) => {
                    self.parent[cur as usize] = np;
                    self.up_edge[cur as usize] = Some(ne);
                }
            }
            if next == cur {
                break;
            }
            prev = Some((cur, edge.expect("non-root vertex must have an edge")));
            cur = next;
        }
    }

    /// Insert the edge (p, q) labelled by `rel`. Returns a complete
    /// relation when the edge closes a cycle; the closing edge is
    /// discarded and the forest is left unchanged in that case.
    fn insert(&mut self, n: &Uint, rel: Relation, p: u64, q: u64) -> Option<Relation> {
        let u = self.vertex(p);
        let v = self.vertex(q);
        debug_assert!(u != v);
        let (ru, rv) = (self.root(u), self.root(v));
        if ru == rv {
            return Some(self.close_cycle(n, rel, u, v));
        }
        let eid = self.edges.len() as u32;
        if self.size[ru as usize] <= self.size[rv as usize] {
            self.reroot(u);
            self.parent[u as usize] = v;
            self.up_edge[u as usize] = Some(eid);
            self.size[rv as usize] += self.size[ru as usize];
        } else {
            self.reroot(v);
            self.parent[v as usize] = u;
            self.up_edge[v as usize] = Some(eid);
            self.size[ru as usize] += self.size[rv as usize];
        }
        let (a, b) = (u, v);
        self.edges.push(GraphEdge { a, b, rel });
        None
    }

    // Multiply the new relation with the tree path between its two
    // endpoints. Every vertex of the closed cycle appears in exactly
    // two of the multiplied edges, so its prime gets an even exponent.
    fn close_cycle(&self, n: &Uint, rel: Relation, u: u32, v: u32) -> Relation {
        // Path from u up to the root, and positions for the meet test.
        let mut upath = vec![u];
        let mut uedges = vec![];
        let mut cur = u;
        while self.parent[cur as usize] != cur {
            uedges.push(self.up_edge[cur as usize].unwrap());
            cur = self.parent[cur as usize];
            upath.push(cur);
        }
        let pos: HashMap<u32, usize> = upath.iter().enumerate().map(|(i, &w)| (w, i)).collect();
        let mut vedges = vec![];
        let mut cur = v;
        let meet = loop {
            if let Some(&i) = pos.get(&cur) {
                break i;
            }
            vedges.push(self.up_edge[cur as usize].unwrap());
            cur = self.parent[cur as usize];
        };
        let mut cycle: Vec<&GraphEdge> = uedges[..meet]
            .iter()
            .chain(&vedges)
            .map(|&e| &self.edges[e as usize])
            .collect();
        let closing = GraphEdge {
            a: u,
            b: v,
            rel,
        };
        cycle.push(&closing);

        let mut x = Uint::ONE;
        let mut exps = HashMap::<i64, u64>::new();
        let mut vertices = HashMap::<u32, u64>::new();
        for e in &cycle {
            x = (x * e.rel.x) % n;
            for &(p, k) in &e.rel.factors {
                *exps.entry(p).or_insert(0) += k;
            }
            for w in [e.a, e.b] {
                if w != 0 {
                    *vertices.entry(w).or_insert(0) += 1;
                }
            }
        }
        let mut factors: Vec<(i64, u64)> = exps.into_iter().collect();
        let mut vertices: Vec<(u32, u64)> = vertices.into_iter().collect();
        vertices.sort_unstable();
        for (w, count) in vertices {
            debug_assert!(count % 2 == 0, "odd cycle multiplicity");
            factors.push((self.labels[w as usize] as i64, count));
        }
        factors.sort_unstable();
        Relation {
            x,
            cofactor: 1,
            factors,
        }
    }
}

/// Runs the linear algebra over the complete relations and extracts a
/// factor pair of n from the null space.
pub fn final_step(
    n: &Uint,
    rels: &[Relation],
    merge_limit: usize,
    verbosity: Verbosity,
) -> Option<(Uint, Uint)> {
    // Row indices for every factor with an odd exponent somewhere;
    // the sign factor -1 sorts first and is the sign row.
    let mut values: Vec<i64> = vec![];
    for r in rels {
        debug_assert!(r.cofactor == 1);
        for &(p, k) in &r.factors {
            if k % 2 == 1 {
                values.push(p);
            }
        }
    }
    values.sort_unstable();
    values.dedup();
    let rows: HashMap<i64, u32> = values
        .iter()
        .enumerate()
        .map(|(i, &p)| (p, i as u32))
        .collect();
    let mut cols = Vec::with_capacity(rels.len());
    for r in rels {
        let mut col: Vec<u32> = r
            .factors
            .iter()
            .filter(|&&(_, k)| k % 2 == 1)
            .map(|&(p, _)| rows[&p])
            .collect();
        col.sort_unstable();
        cols.push(col);
    }
    if verbosity >= Verbosity::Info {
        eprintln!(
            "Building {}x{} matrix ({:.1} entries/col)",
            values.len(),
            cols.len(),
            cols.iter().map(|c| c.len()).sum::<usize>() as f64 / cols.len().max(1) as f64
        );
    }
    let kernel = matrix::kernel(
        SparseMat {
            nrows: values.len(),
            cols,
        },
        merge_limit,
        verbosity,
    );
    if verbosity >= Verbosity::Info {
        eprintln!("Found {} null vectors", kernel.len());
    }
    for eq in kernel {
        let picked: Vec<&Relation> = eq.iter().map(|&j| &rels[j]).collect();
        let (a, b) = combine(n, &picked);
        if verbosity >= Verbosity::Verbose {
            eprintln!("Same square mod n from {} relations", picked.len());
        }
        if let Some((p, q)) = try_factor(n, a, b) {
            return Some((p, q));
        }
    }
    None
}

/// Combine relations whose exponents sum to even values into an
/// identity a^2 = b^2 mod n, taking b as the square root of the
/// product of the Q values through halved exponents.
pub fn combine(n: &Uint, rels: &[&Relation]) -> (Uint, Uint) {
    let mut a = Uint::ONE;
    for r in rels {
        a = (a * r.x) % n;
    }
    let mut exps = HashMap::<i64, u64>::new();
    for r in rels {
        for &(p, k) in &r.factors {
            *exps.entry(p).or_insert(0) += k;
        }
    }
    let mut b = Uint::ONE;
    for (p, k) in exps {
        assert!(k % 2 == 0);
        if p == -1 {
            continue;
        }
        b = (b * pow_mod(Uint::from(p as u64), Uint::from(k / 2), *n)) % n;
    }
    debug_assert!((a * a) % n == (b * b) % n);
    (a, b)
}

/// From a^2 = b^2 mod n, try gcd(a - b, n) then gcd(a + b, n).
pub fn try_factor(n: &Uint, a: Uint, b: Uint) -> Option<(Uint, Uint)> {
    if a == b || (a + b) % n == Uint::ZERO {
        // Trivial congruence.
        return None;
    }
    for c in [(a + n - b) % n, (a + b) % n] {
        let d = Integer::gcd(n, &c);
        if d > Uint::ONE && d < *n {
            let q = n / d;
            debug_assert!(d * q == *n);
            return Some((d, q));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(x: u64, cofactor: u64, factors: &[(i64, u64)]) -> Relation {
        Relation {
            x: Uint::from(x),
            cofactor,
            factors: factors.to_vec(),
        }
    }

    #[test]
    fn test_verify() {
        // 103^2 - 10609 + 208 = ... use n = 10403 = 101*103, x = 105:
        // 105^2 = 11025 = 10403 + 622 -> 105^2 mod n = 622 = 2 * 311
        let n = Uint::from(10403u64);
        let r = rel(105, 311, &[(2, 1)]);
        assert!(r.verify(&n));
        let bad = rel(105, 311, &[(2, 2)]);
        assert!(!bad.verify(&n));
    }

    #[test]
    fn test_partial_combine() {
        // Two partials sharing cofactor 101 on n = 4087 = 61 * 67.
        // 64^2 = 4096 = 9 mod 4087 -> 64^2 = 3^2
        // Construct synthetic relations sharing a large prime.
        let n = Uint::from(100000007u64 * 3);
        let mut set = RelationSet::new(n, true);
        // x1^2 = 2^3 * 101, x2^2 = 2 * 5^2 * 101 (mod n), synthetic.
        set.add(rel(11, 101, &[(2, 3)]), None);
        assert_eq!(set.len(), 0);
        // Same x is deduplicated.
        set.add(rel(11, 101, &[(2, 3)]), None);
        assert_eq!(set.n_partial, 1);
        // Different x, same cofactor: closes a cycle through vertex 1.
        set.add(rel(13, 101, &[(2, 1), (5, 2)]), None);
        assert_eq!(set.n_cycle, 1);
        assert_eq!(set.len(), 1);
        let combined = &set.into_inner()[0];
        assert_eq!(combined.cofactor, 1);
        assert_eq!(combined.x, Uint::from(11u64 * 13));
        // 2^4, 5^2, 101^2
        assert_eq!(combined.factors, vec![(2, 4), (5, 2), (101, 2)]);
    }

    #[test]
    fn test_double_partial_cycle() {
        let n = Uint::from(1000000007u64 * 11);
        let mut set = RelationSet::new(n, true);
        // Edges 101-103, 103-107, 107-101 close a triangle.
        set.add(rel(3, 101 * 103, &[(2, 1)]), Some((101, 103)));
        set.add(rel(5, 103 * 107, &[(2, 1)]), Some((103, 107)));
        assert_eq!(set.len(), 0);
        set.add(rel(7, 107 * 101, &[(2, 1)]), Some((107, 101)));
        assert_eq!(set.len(), 1);
        let combined = &set.into_inner()[0];
        assert_eq!(combined.cofactor, 1);
        let mut f = combined.factors.clone();
        f.sort_unstable();
        assert_eq!(f, vec![(2, 3), (101, 2), (103, 2), (107, 2)]);
    }

    #[test]
    fn test_double_square_cofactor() {
        let n = Uint::from(1000003u64);
        let mut set = RelationSet::new(n, true);
        set.add(rel(3, 101 * 101, &[(2, 1)]), Some((101, 101)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_graph_stays_forest() {
        let n = Uint::from(1000000007u64);
        let mut set = RelationSet::new(n, true);
        // A path 1 - 101 - 103 - 107 plus chords; each chord closes
        // exactly one cycle.
        set.add(rel(3, 101, &[(2, 1)]), None);
        set.add(rel(5, 101 * 103, &[(2, 1)]), Some((101, 103)));
        set.add(rel(7, 103 * 107, &[(2, 1)]), Some((103, 107)));
        assert_eq!(set.len(), 0);
        set.add(rel(11, 107, &[(2, 1)]), None);
        assert_eq!(set.n_cycle, 1);
        set.add(rel(13, 103, &[(2, 1)]), None);
        assert_eq!(set.n_cycle, 2);
    }

    #[test]
    fn test_try_factor() {
        // 21 = 3 * 7: 4^2 = 16 = 2^2 * ... use a=4, b=10: 16 mod 21 = 16,
        // 100 mod 21 = 16.
        let n = Uint::from(21u64);
        let d = try_factor(&n, Uint::from(4u64), Uint::from(10u64));
        assert!(d.is_some());
        let (p, q) = d.unwrap();
        assert_eq!(p * q, n);
        assert!(p > Uint::ONE && q > Uint::ONE);
        // Trivial pairs yield nothing.
        assert!(try_factor(&n, Uint::from(4u64), Uint::from(4u64)).is_none());
        assert!(try_factor(&n, Uint::from(4u64), Uint::from(17u64)).is_none());
    }
}
