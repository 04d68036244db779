//! Demand-to-command transform.
//!
//! Order per output `i`: source select, scale, offset, power, round half
//! up, clamp to `[min[i], max[i]]`. Each optional stage is a const generic
//! parameter of the inner loop, and [`apply`] picks one of the sixteen
//! instantiations from [`ActStages`] once per call.

use crate::config::{ActStages, ActuatorMapConfig};

/// Round half up to the nearest integer.
#[inline(always)]
pub fn round_half_up(x: f32) -> i64 {
    (x + 0.5).floor() as i64
}

/// Clamp `v` into `[min, max]`, counting the clip.
#[inline(always)]
pub fn clamp_counted(v: i64, min: u16, max: u16, clipped: &mut usize) -> u16 {
    if v > i64::from(max) {
        *clipped += 1;
        max
    } else if v < i64::from(min) {
        *clipped += 1;
        min
    } else {
        v as u16
    }
}

/// One trajectory step: `round(prev + coeff * (cur - prev))`, clamped.
#[inline]
pub fn interpolate(prev: u16, cur: u16, coeff: f32, min: u16, max: u16) -> u16 {
    let (p, c) = (f32::from(prev), f32::from(cur));
    let mut ignored = 0;
    clamp_counted(round_half_up(p + coeff * (c - p)), min, max, &mut ignored)
}

struct Arrays<'a> {
    source: &'a [i32],
    scale: &'a [f32],
    offset: &'a [f32],
    power: &'a [f32],
    min: &'a [u16],
    max: &'a [u16],
}

#[inline(always)]
fn transform_with<const SOURCE: bool, const SCALE: bool, const OFFSET: bool, const POWER: bool>(
    demand: &[f32],
    out: &mut [u16],
    a: &Arrays<'_>,
) -> usize {
    let mut clipped = 0;
    for (i, dst) in out.iter_mut().enumerate() {
        let mut x = if SOURCE {
            demand[a.source[i] as usize]
        } else {
            demand[i]
        };
        if SCALE {
            x *= a.scale[i];
        }
        if OFFSET {
            x += a.offset[i];
        }
        if POWER {
            x = x.powf(a.power[i]);
        }
        *dst = clamp_counted(round_half_up(x), a.min[i], a.max[i], &mut clipped);
    }
    clipped
}

fn with_source<const SOURCE: bool>(
    stages: ActStages,
    demand: &[f32],
    out: &mut [u16],
    a: &Arrays<'_>,
) -> usize {
    macro_rules! run {
        ($s:literal, $o:literal, $p:literal) => {
            transform_with::<SOURCE, $s, $o, $p>(demand, out, a)
        };
    }
    match (
        stages.contains(ActStages::SCALE),
        stages.contains(ActStages::OFFSET),
        stages.contains(ActStages::POWER),
    ) {
        (true, true, true) => run!(true, true, true),
        (true, true, false) => run!(true, true, false),
        (true, false, true) => run!(true, false, true),
        (true, false, false) => run!(true, false, false),
        (false, true, true) => run!(false, true, true),
        (false, true, false) => run!(false, true, false),
        (false, false, true) => run!(false, false, true),
        (false, false, false) => run!(false, false, false),
    }
}

/// Transform `demand` into `out` (`cfg.dim` values).
///
/// `demand` must hold `cfg.nacts` values. Returns the number of clamp
/// events; an output clipped at one bound counts once.
pub fn apply(cfg: &ActuatorMapConfig, demand: &[f32], out: &mut [u16]) -> usize {
    debug_assert_eq!(demand.len(), cfg.nacts);
    debug_assert_eq!(out.len(), cfg.dim);

    let a = Arrays {
        source: cfg.source.as_deref().unwrap_or(&[]),
        scale: cfg.scale.as_deref().unwrap_or(&[]),
        offset: cfg.offset.as_deref().unwrap_or(&[]),
        power: cfg.power.as_deref().unwrap_or(&[]),
        min: &cfg.min,
        max: &cfg.max,
    };
    let stages = cfg.stages();
    if stages.contains(ActStages::SOURCE) {
        with_source::<true>(stages, demand, out, &a)
    } else {
        with_source::<false>(stages, demand, out, &a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn cfg(n: usize, min: u16, max: u16) -> ActuatorMapConfig {
        ActuatorMapConfig {
            nacts: n,
            dim: n,
            hw_count: n,
            mapping: None,
            source: None,
            scale: None,
            offset: None,
            power: None,
            min: vec![min; n].into(),
            max: vec![max; n].into(),
            init: None,
            oscillation: None,
        }
    }

    fn run(c: &ActuatorMapConfig, demand: &[f32]) -> (Vec<u16>, usize) {
        let mut out = vec![0; c.dim];
        let clipped = apply(c, demand, &mut out);
        (out, clipped)
    }

    #[test]
    fn round_and_clamp() {
        let c = cfg(4, 0, 1000);
        let (out, clipped) = run(&c, &[2000.4, -5.0, 500.2, 999.6]);
        assert_eq!(out, vec![1000, 0, 500, 1000]);
        assert_eq!(clipped, 2);
    }

    #[test]
    fn half_rounds_up() {
        assert_eq!(round_half_up(2.5), 3);
        assert_eq!(round_half_up(2.49), 2);
        assert_eq!(round_half_up(-2.5), -2);
        assert_eq!(round_half_up(-2.6), -3);
    }

    #[test]
    fn stage_order() {
        let mut c = cfg(2, 0, u16::MAX);
        c.source = Some(Arc::from([1, 0]));
        c.scale = Some(Arc::from([2.0f32, 3.0]));
        c.offset = Some(Arc::from([1.0f32, 1.0]));
        c.power = Some(Arc::from([2.0f32, 1.0]));
        // out[0] = (d[1]*2 + 1)^2, out[1] = d[0]*3 + 1
        let (out, clipped) = run(&c, &[4.0, 3.0]);
        assert_eq!(out, vec![49, 13]);
        assert_eq!(clipped, 0);
    }

    #[test]
    fn source_can_widen_output() {
        let mut c = cfg(2, 0, 100);
        c.dim = 3;
        c.hw_count = 3;
        c.source = Some(Arc::from([0, 1, 1]));
        c.min = Arc::from([0u16; 3]);
        c.max = Arc::from([100u16; 3]);
        let (out, _) = run(&c, &[7.0, 9.0]);
        assert_eq!(out, vec![7, 9, 9]);
    }

    #[test]
    fn interpolation_steps() {
        assert_eq!(interpolate(100, 200, 0.0, 0, 1000), 100);
        assert_eq!(interpolate(100, 200, 0.5, 0, 1000), 150);
        assert_eq!(interpolate(100, 200, 1.0, 0, 1000), 200);
        assert_eq!(interpolate(100, 200, 1.5, 0, 220), 220);
        assert_eq!(interpolate(200, 100, 2.0, 50, 1000), 50);
    }
}
