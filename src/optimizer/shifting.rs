//! Sparse (origin, offset) structure of the load-shifting assignment.

use serde::Serialize;
use std::ops::Range;

/// A possible move of shiftable load from `origin` to `origin + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ShiftArc {
    pub origin: usize,
    pub offset: i64,
}

impl ShiftArc {
    pub fn destination(&self) -> usize {
        (self.origin as i64 + self.offset) as usize
    }
}

/// All arcs with a non-zero offset that can carry load.
///
/// An arc exists only if the destination lies inside the horizon and within
/// the shift window, the origin has shiftable load and the destination has
/// headroom under the overload factor. The "stay" option (offset 0) is not an
/// arc; every origin always has it.
#[derive(Debug, Clone)]
pub struct ShiftArcs {
    arcs: Vec<ShiftArc>,
    by_origin: Vec<Range<usize>>,
    inbound: Vec<Vec<usize>>,
    origin_cap: Vec<f64>,
    headroom: Vec<f64>,
}

impl ShiftArcs {
    pub fn enumerate(flexible_kw: &[f64], max_shift_fraction: &[f64], window: usize, overload_factor: f64) -> Self {
        let len = flexible_kw.len();
        let window = window as i64;
        let origin_cap: Vec<f64> = flexible_kw
            .iter()
            .zip(max_shift_fraction)
            .map(|(flex, fraction)| flex * fraction)
            .collect();
        let headroom: Vec<f64> = flexible_kw
            .iter()
            .map(|flex| (overload_factor - 1.0) * flex)
            .collect();

        let mut arcs = Vec::new();
        let mut by_origin = Vec::with_capacity(len);
        let mut inbound = vec![Vec::new(); len];

        for origin in 0..len {
            let first = arcs.len();
            if origin_cap[origin] > 0.0 {
                let lo = (origin as i64 - window).max(0);
                let hi = (origin as i64 + window).min(len as i64 - 1);
                for destination in lo..=hi {
                    let destination = destination as usize;
                    if destination == origin || headroom[destination] <= 0.0 {
                        continue;
                    }
                    inbound[destination].push(arcs.len());
                    arcs.push(ShiftArc {
                        origin,
                        offset: destination as i64 - origin as i64,
                    });
                }
            }
            by_origin.push(first..arcs.len());
        }

        Self {
            arcs,
            by_origin,
            inbound,
            origin_cap,
            headroom,
        }
    }

    pub fn len(&self) -> usize {
        self.arcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arcs.is_empty()
    }

    pub fn arcs(&self) -> &[ShiftArc] {
        &self.arcs
    }

    pub fn arc(&self, index: usize) -> ShiftArc {
        self.arcs[index]
    }

    /// Arc indices leaving `origin`
    pub fn outbound(&self, origin: usize) -> Range<usize> {
        self.by_origin[origin].clone()
    }

    /// Arc indices arriving at `destination`
    pub fn inbound(&self, destination: usize) -> &[usize] {
        &self.inbound[destination]
    }

    /// Shiftable load at `origin` (kW)
    pub fn origin_cap(&self, origin: usize) -> f64 {
        self.origin_cap[origin]
    }

    /// Extra flexible load `destination` may receive (kW)
    pub fn headroom(&self, destination: usize) -> f64 {
        self.headroom[destination]
    }

    /// Upper bound of the amount an arc can carry
    pub fn arc_cap(&self, index: usize) -> f64 {
        let arc = self.arcs[index];
        self.origin_cap[arc.origin].min(self.headroom[arc.destination()])
    }

    pub fn max_origin_cap(&self) -> f64 {
        self.origin_cap.iter().copied().fold(0.0, f64::max)
    }
}
