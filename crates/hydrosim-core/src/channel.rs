//! Trapezoidal channel cross-sections and their reference hydraulics.

use crate::errors::{HydroError, HydroResult};
use serde::{Deserialize, Serialize};

/// A trapezoidal channel profile with Manning friction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelProfile {
    pub name: String,
    /// Bed width [m].
    pub bottom_width: f64,
    /// Side slope, horizontal per unit vertical [-].
    pub side_slope: f64,
    /// Manning roughness [s/m^(1/3)].
    pub mannings_n: f64,
    /// Longitudinal bed slope [-].
    pub bed_slope: f64,
}

impl ChannelProfile {
    pub fn validate(&self) -> HydroResult<()> {
        if self.mannings_n <= 0.0 || self.bed_slope <= 0.0 || self.bottom_width <= 0.0 {
            return Err(HydroError::Config(format!(
                "channel '{}' needs positive Manning n, bed slope and bottom width",
                self.name
            )));
        }
        if self.side_slope < 0.0 {
            return Err(HydroError::Config(format!(
                "channel '{}' has a negative side slope",
                self.name
            )));
        }
        Ok(())
    }

    pub fn flow_area(&self, depth: f64) -> f64 {
        (self.bottom_width + self.side_slope * depth) * depth
    }

    pub fn wetted_perimeter(&self, depth: f64) -> f64 {
        self.bottom_width + 2.0 * depth * (1.0 + self.side_slope * self.side_slope).sqrt()
    }

    pub fn top_width(&self, depth: f64) -> f64 {
        self.bottom_width + 2.0 * self.side_slope * depth
    }

    /// Manning discharge at a given depth [m³/s].
    pub fn discharge(&self, depth: f64) -> f64 {
        if depth <= 0.0 {
            return 0.0;
        }
        let area = self.flow_area(depth);
        let radius = area / self.wetted_perimeter(depth);
        area * radius.powf(2.0 / 3.0) * self.bed_slope.sqrt() / self.mannings_n
    }

    /// Normal depth for discharge `q` by bisection on the monotone Manning
    /// relation.
    pub fn normal_depth(&self, q: f64) -> HydroResult<f64> {
        if q <= 0.0 {
            return Ok(0.0);
        }
        let mut hi = 1.0;
        while self.discharge(hi) < q {
            hi *= 2.0;
            if hi > 1e5 {
                return Err(HydroError::Numerical(format!(
                    "normal depth for Q={q} m3/s did not bracket in channel '{}'",
                    self.name
                )));
            }
        }
        let mut lo = 0.0;
        for _ in 0..100 {
            let mid = 0.5 * (lo + hi);
            if self.discharge(mid) < q {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        Ok(0.5 * (lo + hi))
    }

    /// Kinematic wave celerity dQ/dA at discharge `q` [m/s].
    pub fn celerity(&self, q: f64) -> HydroResult<f64> {
        let depth = self.normal_depth(q.max(1e-6))?;
        let delta = (depth * 1e-4).max(1e-6);
        let dq_dh = (self.discharge(depth + delta) - self.discharge((depth - delta).max(0.0)))
            / (delta + delta.min(depth));
        Ok((dq_dh / self.top_width(depth)).max(1e-6))
    }

    /// Reference hydraulic state at discharge `q_ref`.
    pub fn reference(&self, q_ref: f64) -> HydroResult<ChannelReference> {
        let depth = self.normal_depth(q_ref)?;
        Ok(ChannelReference {
            q_ref,
            depth,
            celerity: self.celerity(q_ref)?,
            top_width: self.top_width(depth).max(1e-6),
            bed_slope: self.bed_slope,
        })
    }
}

/// Hydraulic state of a channel at its reference flow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelReference {
    pub q_ref: f64,
    pub depth: f64,
    /// Celerity at the reference flow [m/s].
    pub celerity: f64,
    /// Top width at the reference flow [m].
    pub top_width: f64,
    pub bed_slope: f64,
}

impl ChannelReference {
    /// Muskingum storage time over a reach of length `dx` [d].
    pub fn muskingum_k(&self, dx: f64) -> f64 {
        dx / self.celerity / 86400.0
    }

    /// Muskingum-Cunge weighting factor for a segment of length `dx`.
    pub fn muskingum_x(&self, dx: f64) -> f64 {
        let x = 0.5 * (1.0 - self.q_ref / (self.top_width * self.bed_slope * self.celerity * dx));
        x.clamp(0.0, 0.5)
    }

    /// Hydraulic diffusivity for the diffusive-wave kernel [m²/s].
    pub fn diffusivity(&self) -> f64 {
        self.q_ref / (2.0 * self.top_width * self.bed_slope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_channel() -> ChannelProfile {
        ChannelProfile {
            name: "trapezoid".to_string(),
            bottom_width: 5.0,
            side_slope: 2.0,
            mannings_n: 0.035,
            bed_slope: 0.001,
        }
    }

    #[test]
    fn discharge_is_monotone_in_depth() {
        let ch = test_channel();
        let mut prev = 0.0;
        for i in 1..20 {
            let q = ch.discharge(0.25 * i as f64);
            assert!(q > prev);
            prev = q;
        }
    }

    #[test]
    fn normal_depth_inverts_discharge() {
        let ch = test_channel();
        for &q in &[0.5, 5.0, 50.0] {
            let h = ch.normal_depth(q).unwrap();
            assert_relative_eq!(ch.discharge(h), q, max_relative = 1e-6);
        }
    }

    #[test]
    fn celerity_exceeds_mean_velocity() {
        let ch = test_channel();
        let q = 10.0;
        let h = ch.normal_depth(q).unwrap();
        let v = q / ch.flow_area(h);
        let c = ch.celerity(q).unwrap();
        // kinematic celerity is ~5/3 of the mean velocity for wide sections
        assert!(c > v && c < 2.0 * v, "v = {v}, c = {c}");
    }

    #[test]
    fn cunge_x_is_within_bounds() {
        let ch = test_channel();
        let rf = ch.reference(10.0).unwrap();
        for &dx in &[100.0, 1000.0, 10000.0] {
            let x = rf.muskingum_x(dx);
            assert!((0.0..=0.5).contains(&x));
        }
        // X approaches 0.5 for very long segments
        assert!(rf.muskingum_x(1e7) > 0.49);
    }

    #[test]
    fn rejects_bad_geometry() {
        let mut ch = test_channel();
        ch.mannings_n = 0.0;
        assert!(ch.validate().is_err());
    }
}
