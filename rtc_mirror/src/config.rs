//! Actuator routing and transform configuration.
//!
//! An [`ActuatorMapConfig`] is rebuilt from the parameter store on every
//! update and swapped in whole under the engine lock. Array fields are
//! `Arc` views of the store's values; no array is copied.
//!
//! ## Output layout
//! `dim` values leave the engine per frame: `len(actMapping)` when a
//! mapping is configured, otherwise `nacts`. The first `hw_count` go to
//! DAC channels (through `actMapping` if set), the rest to the socket.

use std::sync::Arc;

use bitflags::bitflags;
use rtc_common::ingest::{Expect, ParamError, ParamErrors, ParamSet};
use rtc_common::param::ParamSource;

use crate::frame::MAX_VALUES;

/// Parameter names read by the dispatch engine.
pub mod names {
    /// Initial values streamed once at start.
    pub const ACT_INIT: &str = "actInit";
    /// Output index to DAC channel.
    pub const ACT_MAPPING: &str = "actMapping";
    /// Upper clamp per output.
    pub const ACT_MAX: &str = "actMax";
    /// Lower clamp per output.
    pub const ACT_MIN: &str = "actMin";
    /// Additive offset per output.
    pub const ACT_OFFSET: &str = "actOffset";
    /// Settling trajectory coefficients.
    pub const ACT_OSC_ARR: &str = "actOscArr";
    /// 1 when the trajectory has one coefficient per output per step.
    pub const ACT_OSC_PER_ACT: &str = "actOscPerAct";
    /// Sleep between trajectory steps, in nanoseconds.
    pub const ACT_OSC_TIME: &str = "actOscTime";
    /// Exponent per output.
    pub const ACT_POWER: &str = "actPower";
    /// Scale per output.
    pub const ACT_SCALE: &str = "actScale";
    /// Demand index per output.
    pub const ACT_SOURCE: &str = "actSource";
    /// Initial values that go to the DAC.
    pub const NACT_INIT_PDAO32: &str = "nactInitPdao32";
    /// Outputs that go to the DAC.
    pub const NACT_PDAO32: &str = "nactPdao32";
    /// Demand vector length.
    pub const NACTS: &str = "nacts";

    /// Names that must be present in the store.
    pub const REQUIRED: [&str; 10] = [
        ACT_INIT,
        ACT_MAPPING,
        ACT_MAX,
        ACT_MIN,
        ACT_OFFSET,
        ACT_SCALE,
        ACT_SOURCE,
        NACT_INIT_PDAO32,
        NACT_PDAO32,
        NACTS,
    ];

    /// Names that may be absent.
    pub const OPTIONAL: [&str; 4] = [ACT_OSC_ARR, ACT_OSC_PER_ACT, ACT_OSC_TIME, ACT_POWER];
}

bitflags! {
    /// Optional transform stages present in a configuration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActStages: u8 {
        /// Read the demand through `actSource`.
        const SOURCE = 1 << 0;
        /// Multiply by `actScale`.
        const SCALE = 1 << 1;
        /// Add `actOffset`.
        const OFFSET = 1 << 2;
        /// Raise to `actPower`.
        const POWER = 1 << 3;
    }
}

/// Values streamed once when the dispatch thread starts.
#[derive(Debug, Clone, PartialEq)]
pub struct InitSequence {
    /// All initial values.
    pub values: Arc<[u16]>,
    /// Leading values written to DAC channels `0..hw_count`.
    pub hw_count: usize,
}

impl InitSequence {
    /// Values for the DAC.
    pub fn hardware(&self) -> &[u16] {
        &self.values[..self.hw_count]
    }

    /// Values for the socket.
    pub fn socket(&self) -> &[u16] {
        &self.values[self.hw_count..]
    }
}

/// Settling trajectory coefficients.
#[derive(Debug, Clone, PartialEq)]
pub enum Trajectory {
    /// One coefficient per step, shared by every output.
    PerStep(Arc<[f32]>),
    /// `dim` coefficients per step.
    PerActuator {
        /// Row-major `steps × dim` coefficients.
        coeffs: Arc<[f32]>,
        /// Row length.
        dim: usize,
    },
}

impl Trajectory {
    /// Number of steps.
    pub fn steps(&self) -> usize {
        match self {
            Self::PerStep(c) => c.len(),
            Self::PerActuator { coeffs, dim } => coeffs.len() / dim,
        }
    }

    /// Coefficient for output `act` at `step`.
    #[inline]
    pub fn coeff(&self, step: usize, act: usize) -> f32 {
        match self {
            Self::PerStep(c) => c[step],
            Self::PerActuator { coeffs, dim } => coeffs[step * dim + act],
        }
    }
}

/// Trajectory plus its pacing.
#[derive(Debug, Clone, PartialEq)]
pub struct Oscillation {
    /// Coefficients.
    pub trajectory: Trajectory,
    /// Sleep between steps, in nanoseconds.
    pub step_ns: i64,
}

/// Validated actuator configuration.
#[derive(Debug, Clone)]
pub struct ActuatorMapConfig {
    /// Demand vector length.
    pub nacts: usize,
    /// Output values per frame.
    pub dim: usize,
    /// Leading outputs that go to the DAC.
    pub hw_count: usize,
    /// DAC channel per output, for the first `hw_count` outputs.
    pub mapping: Option<Arc<[i32]>>,
    /// Demand index per output.
    pub source: Option<Arc<[i32]>>,
    /// Scale per output.
    pub scale: Option<Arc<[f32]>>,
    /// Offset per output.
    pub offset: Option<Arc<[f32]>>,
    /// Exponent per output.
    pub power: Option<Arc<[f32]>>,
    /// Lower clamp per output.
    pub min: Arc<[u16]>,
    /// Upper clamp per output.
    pub max: Arc<[u16]>,
    /// Start-up values.
    pub init: Option<InitSequence>,
    /// Settling trajectory.
    pub oscillation: Option<Oscillation>,
}

impl ActuatorMapConfig {
    /// Build a configuration from `source`.
    ///
    /// `nacts` is the demand length fixed at open and `hw_channels` the
    /// DAC's channel count. On success returns the configuration and the
    /// fields that were disabled or adjusted.
    pub fn from_params(
        source: &dyn ParamSource,
        nacts: usize,
        hw_channels: usize,
    ) -> Result<(Self, Vec<ParamError>), ParamErrors> {
        use names::*;

        let set = ParamSet::fetch(source, &REQUIRED, &OPTIONAL)?;
        let mut errors = ParamErrors::default();
        let mut warnings = Vec::new();

        match set.scalar_i32(NACTS) {
            Ok(n) if usize::try_from(n).ok() == Some(nacts) => {}
            Ok(n) => {
                return Err(ParamError::invalid(
                    NACTS,
                    format!("changed from {nacts} to {n}; close and reopen"),
                )
                .into());
            }
            Err(e) => return Err(e.into()),
        }

        let mapping = set.ints(ACT_MAPPING, Expect::Any).unwrap_or_else(|e| {
            warnings.push(e);
            None
        });
        let dim = mapping.as_ref().map_or(nacts, |m| m.len());
        if dim == 0 || dim > MAX_VALUES {
            return Err(ParamError::invalid(
                ACT_MAPPING,
                format!("{dim} outputs (must be 1..={MAX_VALUES})"),
            )
            .into());
        }
        let per_act = Expect::Exactly(dim);

        let hw_count = match set.scalar_i32(NACT_PDAO32) {
            Ok(n) if n >= 0 && n as usize <= dim => n as usize,
            Ok(n) if n > 0 => {
                warnings.push(ParamError::invalid(
                    NACT_PDAO32,
                    format!("{n} exceeds {dim} outputs, clamped"),
                ));
                dim
            }
            Ok(n) => {
                warnings.push(ParamError::invalid(NACT_PDAO32, format!("negative ({n})")));
                dim
            }
            Err(e) => {
                warnings.push(e);
                dim
            }
        };
        match &mapping {
            Some(m) => {
                if let Some((i, ch)) = m[..hw_count]
                    .iter()
                    .enumerate()
                    .find(|&(_, &ch)| ch < 0 || ch as usize >= hw_channels)
                {
                    errors.push(ParamError::invalid(
                        ACT_MAPPING,
                        format!("output {i} maps to channel {ch}, DAC has {hw_channels}"),
                    ));
                }
            }
            None if hw_count > hw_channels => errors.push(ParamError::invalid(
                NACT_PDAO32,
                format!("{hw_count} DAC outputs, DAC has {hw_channels} channels"),
            )),
            None => {}
        }

        let src = set.ints(ACT_SOURCE, per_act).unwrap_or_else(|e| {
            warnings.push(e);
            None
        });
        if let Some(s) = &src {
            if let Some(bad) = s.iter().find(|&&j| j < 0 || j as usize >= nacts) {
                errors.push(ParamError::invalid(
                    ACT_SOURCE,
                    format!("index {bad} outside demand of {nacts}"),
                ));
            }
        } else if dim > nacts {
            errors.push(ParamError::invalid(
                ACT_MAPPING,
                format!("{dim} outputs but only {nacts} demands and no {ACT_SOURCE}"),
            ));
        }

        let mut per_output = |name: &'static str| {
            set.floats(name, per_act).unwrap_or_else(|e| {
                warnings.push(e);
                None
            })
        };
        let scale = per_output(ACT_SCALE);
        let offset = per_output(ACT_OFFSET);
        let power = per_output(ACT_POWER);

        let mut bound = |name: &'static str| match set.ushorts(name, per_act) {
            Ok(Some(v)) => Some(v),
            Ok(None) => {
                errors.push(ParamError::WrongSize {
                    name,
                    expected: per_act,
                    found: 0,
                });
                None
            }
            Err(e) => {
                errors.push(e);
                None
            }
        };
        let min = bound(ACT_MIN);
        let max = bound(ACT_MAX);
        if let (Some(lo), Some(hi)) = (&min, &max) {
            if let Some(i) = lo.iter().zip(hi.iter()).position(|(l, h)| l > h) {
                errors.push(ParamError::invalid(
                    ACT_MIN,
                    format!("output {i}: min {} above max {}", lo[i], hi[i]),
                ));
            }
        }

        let init = Self::init_sequence(&set, hw_channels, &mut warnings)
            .map_err(|e| errors.push(e))
            .ok()
            .flatten();
        let oscillation = Self::oscillation(&set, dim)
            .map_err(|e| errors.push(e))
            .ok()
            .flatten();

        match (min, max) {
            (Some(min), Some(max)) if errors.is_empty() => Ok((
                Self {
                    nacts,
                    dim,
                    hw_count,
                    mapping,
                    source: src,
                    scale,
                    offset,
                    power,
                    min,
                    max,
                    init,
                    oscillation,
                },
                warnings,
            )),
            _ => Err(errors),
        }
    }

    fn init_sequence(
        set: &ParamSet,
        hw_channels: usize,
        warnings: &mut Vec<ParamError>,
    ) -> Result<Option<InitSequence>, ParamError> {
        use names::*;

        let Some(values) = set.ushorts(ACT_INIT, Expect::Any)? else {
            return Ok(None);
        };
        let given = set.get(NACT_INIT_PDAO32).filter(|v| !v.is_empty());
        let hw_count = match given.map(|_| set.scalar_i32(NACT_INIT_PDAO32)) {
            None => values.len(),
            Some(Ok(n)) if n >= 0 => (n as usize).min(values.len()),
            Some(Ok(n)) => {
                warnings.push(ParamError::invalid(NACT_INIT_PDAO32, format!("negative ({n})")));
                values.len()
            }
            Some(Err(e)) => {
                warnings.push(e);
                values.len()
            }
        };
        if hw_count > hw_channels {
            return Err(ParamError::invalid(
                NACT_INIT_PDAO32,
                format!("{hw_count} initial DAC values, DAC has {hw_channels} channels"),
            ));
        }
        if values.len() - hw_count > MAX_VALUES {
            return Err(ParamError::invalid(ACT_INIT, "socket share too long for one frame"));
        }
        Ok(Some(InitSequence { values, hw_count }))
    }

    fn oscillation(set: &ParamSet, dim: usize) -> Result<Option<Oscillation>, ParamError> {
        use names::*;

        let Some(coeffs) = set.floats(ACT_OSC_ARR, Expect::Any)? else {
            return Ok(None);
        };
        let per_act = matches!(set.scalar_i32(ACT_OSC_PER_ACT), Ok(1));
        let trajectory = if per_act {
            if coeffs.len() % dim != 0 {
                return Err(ParamError::WrongSize {
                    name: ACT_OSC_ARR,
                    expected: Expect::MultipleOf(dim),
                    found: coeffs.len(),
                });
            }
            Trajectory::PerActuator { coeffs, dim }
        } else {
            Trajectory::PerStep(coeffs)
        };
        let step_ns = if set.contains(ACT_OSC_TIME) {
            match set.scalar_i32(ACT_OSC_TIME)? {
                ns if ns >= 0 => i64::from(ns),
                ns => return Err(ParamError::invalid(ACT_OSC_TIME, format!("negative ({ns})"))),
            }
        } else {
            0
        };
        Ok(Some(Oscillation {
            trajectory,
            step_ns,
        }))
    }

    /// Optional stages present.
    pub fn stages(&self) -> ActStages {
        let mut s = ActStages::empty();
        s.set(ActStages::SOURCE, self.source.is_some());
        s.set(ActStages::SCALE, self.scale.is_some());
        s.set(ActStages::OFFSET, self.offset.is_some());
        s.set(ActStages::POWER, self.power.is_some());
        s
    }

    /// DAC channel for output `i` (`i < hw_count`).
    #[inline]
    pub fn channel(&self, i: usize) -> u16 {
        match &self.mapping {
            Some(m) => m[i] as u16,
            None => i as u16,
        }
    }

    /// Outputs that go to the socket.
    pub fn socket_count(&self) -> usize {
        self.dim - self.hw_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtc_common::param::ParamBuffer;

    fn base() -> ParamBuffer {
        ParamBuffer::new()
            .with(names::ACT_INIT, Vec::<u16>::new())
            .with(names::ACT_MAPPING, Vec::<i32>::new())
            .with(names::ACT_MAX, vec![1000u16; 4])
            .with(names::ACT_MIN, vec![0u16; 4])
            .with(names::ACT_OFFSET, Vec::<f32>::new())
            .with(names::ACT_SCALE, Vec::<f32>::new())
            .with(names::ACT_SOURCE, Vec::<i32>::new())
            .with(names::NACT_INIT_PDAO32, Vec::<i32>::new())
            .with(names::NACT_PDAO32, 2)
            .with(names::NACTS, 4)
    }

    #[test]
    fn minimal_config() {
        let (cfg, warnings) = ActuatorMapConfig::from_params(&base(), 4, 32).unwrap();
        assert!(warnings.is_empty());
        assert_eq!((cfg.dim, cfg.hw_count, cfg.socket_count()), (4, 2, 2));
        assert_eq!(cfg.stages(), ActStages::empty());
        assert_eq!(cfg.channel(1), 1);
        assert!(cfg.init.is_none() && cfg.oscillation.is_none());
    }

    #[test]
    fn nacts_change_rejects() {
        let errs = ActuatorMapConfig::from_params(&base(), 5, 32).unwrap_err();
        assert!(errs.mentions(names::NACTS));
    }

    #[test]
    fn bounds_must_match_dim_and_order() {
        let p = base().with(names::ACT_MAX, vec![1000u16; 3]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_MAX));

        let p = base().with(names::ACT_MIN, vec![0u16, 0, 2000, 0]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_MIN));

        let p = base().with(names::ACT_MIN, vec![0.0f32; 4]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_MIN));
    }

    #[test]
    fn bad_optional_arrays_degrade() {
        let p = base()
            .with(names::ACT_SCALE, vec![1.0f32; 3])
            .with(names::ACT_OFFSET, vec![1, 2, 3, 4])
            .with(names::ACT_POWER, vec![2.0f32; 4]);
        let (cfg, warnings) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        assert_eq!(warnings.len(), 2);
        assert_eq!(cfg.stages(), ActStages::POWER);
    }

    #[test]
    fn nact_pdao32_is_clamped() {
        let p = base().with(names::NACT_PDAO32, 9);
        let (cfg, warnings) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        assert_eq!(cfg.hw_count, 4);
        assert_eq!(warnings.len(), 1);

        let p = base().with(names::NACT_PDAO32, 1.5f32);
        let (cfg, _) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        assert_eq!(cfg.hw_count, 4);
    }

    #[test]
    fn mapping_sets_dim_and_channels() {
        let p = base()
            .with(names::ACT_MAPPING, vec![7, 3])
            .with(names::ACT_MAX, vec![10u16; 2])
            .with(names::ACT_MIN, vec![0u16; 2]);
        let (cfg, _) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        assert_eq!(cfg.dim, 2);
        assert_eq!((cfg.channel(0), cfg.channel(1)), (7, 3));

        let p = p.with(names::ACT_MAPPING, vec![7, 40]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_MAPPING));
    }

    #[test]
    fn dim_above_nacts_needs_source() {
        let p = base()
            .with(names::ACT_MAPPING, vec![0, 1, 2, 3, 4, 5])
            .with(names::ACT_MAX, vec![10u16; 6])
            .with(names::ACT_MIN, vec![0u16; 6]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).is_err());

        let p = p.with(names::ACT_SOURCE, vec![0, 1, 2, 3, 3, 3]);
        let (cfg, _) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        assert!(cfg.stages().contains(ActStages::SOURCE));

        let p = p.with(names::ACT_SOURCE, vec![0, 1, 2, 3, 3, 4]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_SOURCE));
    }

    #[test]
    fn init_sequence_split() {
        let p = base().with(names::ACT_INIT, vec![1u16, 2, 3, 4, 5]);
        let (cfg, _) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        let init = cfg.init.unwrap();
        assert_eq!(init.hardware(), &[1, 2, 3, 4, 5]);
        assert!(init.socket().is_empty());

        let p = p.with(names::NACT_INIT_PDAO32, 2);
        let (cfg, _) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        let init = cfg.init.unwrap();
        assert_eq!(init.hardware(), &[1, 2]);
        assert_eq!(init.socket(), &[3, 4, 5]);

        let p = p.with(names::ACT_INIT, vec![1.0f32]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_INIT));
    }

    #[test]
    fn trajectory_shapes() {
        let p = base().with(names::ACT_OSC_ARR, vec![0.5f32; 8]);
        let (cfg, _) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        let osc = cfg.oscillation.unwrap();
        assert_eq!(osc.trajectory.steps(), 8);
        assert_eq!(osc.step_ns, 0);

        let p = p.with(names::ACT_OSC_PER_ACT, 1).with(names::ACT_OSC_TIME, 1000);
        let (cfg, _) = ActuatorMapConfig::from_params(&p, 4, 32).unwrap();
        let osc = cfg.oscillation.unwrap();
        assert_eq!(osc.trajectory.steps(), 2);
        assert_eq!(osc.step_ns, 1000);

        let p = p.with(names::ACT_OSC_ARR, vec![0.5f32; 6]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_OSC_ARR));

        let p = base()
            .with(names::ACT_OSC_ARR, vec![1.0f32])
            .with(names::ACT_OSC_TIME, vec![1, 2]);
        assert!(ActuatorMapConfig::from_params(&p, 4, 32).unwrap_err().mentions(names::ACT_OSC_TIME));
    }

    #[test]
    fn per_actuator_coefficients() {
        let t = Trajectory::PerActuator {
            coeffs: Arc::from([0.0f32, 0.1, 1.0, 1.1]),
            dim: 2,
        };
        assert_eq!(t.coeff(1, 1), 1.1);
        assert_eq!(Trajectory::PerStep(Arc::from([0.2f32, 0.7])).coeff(1, 5), 0.7);
    }
}
