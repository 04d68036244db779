//! Typed ingestion of a named parameter set.
//!
//! Both engines reconfigure from the same kind of source: a fixed list of
//! required names, a list of optional names, and per-name checks on element
//! type and count. [`ParamSet::fetch`] collects every missing name at once
//! so a single update reports all of its problems, and the typed accessors
//! turn a present value into the shape the caller asked for.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::error_sink::ErrorSink;
use crate::param::{DType, ParamSource, ParamValue};

// ─── Errors ─────────────────────────────────────────────────────────

/// Expected element count of an array parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// Exactly this many elements.
    Exactly(usize),
    /// A non-zero multiple of this many elements.
    MultipleOf(usize),
    /// Any non-empty length.
    Any,
}

impl Expect {
    /// True when `len` satisfies this expectation.
    pub fn matches(self, len: usize) -> bool {
        match self {
            Self::Exactly(n) => len == n,
            Self::MultipleOf(n) => n > 0 && len > 0 && len % n == 0,
            Self::Any => true,
        }
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exactly(n) => write!(f, "{n}"),
            Self::MultipleOf(n) => write!(f, "a multiple of {n}"),
            Self::Any => write!(f, "any number of"),
        }
    }
}

/// A single problem with one named parameter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    /// A required name is absent from the source.
    #[error("missing parameter {name}")]
    Missing {
        /// Parameter name.
        name: &'static str,
    },

    /// The value has the wrong element type.
    #[error("{name}: expected dtype '{expected}', found '{found}'")]
    WrongType {
        /// Parameter name.
        name: &'static str,
        /// Required element type.
        expected: DType,
        /// Element type present in the source.
        found: DType,
    },

    /// The value has the wrong element count.
    #[error("{name}: expected {expected} elements, found {found}")]
    WrongSize {
        /// Parameter name.
        name: &'static str,
        /// Required count.
        expected: Expect,
        /// Count present in the source.
        found: usize,
    },

    /// The value is well-formed but semantically unacceptable.
    #[error("{name}: {reason}")]
    Invalid {
        /// Parameter name.
        name: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}

impl ParamError {
    /// Name of the offending parameter.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Missing { name }
            | Self::WrongType { name, .. }
            | Self::WrongSize { name, .. }
            | Self::Invalid { name, .. } => name,
        }
    }

    /// Shorthand for [`ParamError::Invalid`].
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Every problem found while applying one update.
///
/// Returned when an update is rejected as a whole; the engine keeps its
/// previous configuration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamErrors(pub Vec<ParamError>);

impl ParamErrors {
    /// True when no problem has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of recorded problems.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Record a problem.
    pub fn push(&mut self, err: ParamError) {
        self.0.push(err);
    }

    /// Iterate over recorded problems.
    pub fn iter(&self) -> impl Iterator<Item = &ParamError> {
        self.0.iter()
    }

    /// True when some problem concerns `name`.
    pub fn mentions(&self, name: &str) -> bool {
        self.0.iter().any(|e| e.name() == name)
    }

    /// `Ok(value)` if nothing was recorded, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ParamErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} parameter error(s)", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParamErrors {}

impl From<ParamError> for ParamErrors {
    fn from(err: ParamError) -> Self {
        Self(vec![err])
    }
}

impl FromIterator<ParamError> for ParamErrors {
    fn from_iter<I: IntoIterator<Item = ParamError>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of an accepted update.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum UpdateOutcome {
    /// Every field was applied as given.
    Applied,
    /// The update was applied, but the listed fields fell back to their
    /// disabled state.
    Degraded(Vec<ParamError>),
}

impl UpdateOutcome {
    /// `Applied` when `warnings` is empty, `Degraded` otherwise.
    pub fn from_warnings(warnings: Vec<ParamError>) -> Self {
        if warnings.is_empty() {
            Self::Applied
        } else {
            Self::Degraded(warnings)
        }
    }

    /// True for [`UpdateOutcome::Degraded`].
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    /// Fields that fell back, empty when fully applied.
    pub fn warnings(&self) -> &[ParamError] {
        match self {
            Self::Applied => &[],
            Self::Degraded(w) => w,
        }
    }
}

// ─── Fetched Set ────────────────────────────────────────────────────

/// Snapshot of the values for a fixed list of parameter names.
#[derive(Debug, Clone)]
pub struct ParamSet {
    values: Vec<(&'static str, ParamValue)>,
}

impl ParamSet {
    /// Look up `required` and `optional` names in `source`.
    ///
    /// Fails with one [`ParamError::Missing`] per absent required name.
    /// Absent optional names are simply not present in the set.
    pub fn fetch(
        source: &dyn ParamSource,
        required: &[&'static str],
        optional: &[&'static str],
    ) -> Result<Self, ParamErrors> {
        let mut values = Vec::with_capacity(required.len() + optional.len());
        let mut missing = ParamErrors::default();

        for &name in required {
            match source.get(name) {
                Some(v) => values.push((name, v)),
                None => missing.push(ParamError::Missing { name }),
            }
        }
        for &name in optional {
            if let Some(v) = source.get(name) {
                values.push((name, v));
            }
        }

        missing.into_result(Self { values })
    }

    /// Raw value of `name`, if fetched.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// True when `name` was present in the source.
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn require(&self, name: &'static str) -> Result<&ParamValue, ParamError> {
        self.get(name).ok_or(ParamError::Missing { name })
    }

    /// `name` as a single `i32`.
    pub fn scalar_i32(&self, name: &'static str) -> Result<i32, ParamError> {
        let v = self.require(name)?;
        let arr = v.as_ints().ok_or(ParamError::WrongType {
            name,
            expected: DType::Int,
            found: v.dtype(),
        })?;
        single(name, arr)
    }

    /// `name` as a single `f32`.
    pub fn scalar_f32(&self, name: &'static str) -> Result<f32, ParamError> {
        let v = self.require(name)?;
        let arr = v.as_floats().ok_or(ParamError::WrongType {
            name,
            expected: DType::Float,
            found: v.dtype(),
        })?;
        single(name, arr)
    }

    /// `name` as an `i32` array. Absent or empty yields `Ok(None)`.
    pub fn ints(&self, name: &'static str, expect: Expect) -> Result<Option<Arc<[i32]>>, ParamError> {
        self.array(name, expect, DType::Int, ParamValue::as_ints)
    }

    /// `name` as an `f32` array. Absent or empty yields `Ok(None)`.
    pub fn floats(
        &self,
        name: &'static str,
        expect: Expect,
    ) -> Result<Option<Arc<[f32]>>, ParamError> {
        self.array(name, expect, DType::Float, ParamValue::as_floats)
    }

    /// `name` as a `u16` array. Absent or empty yields `Ok(None)`.
    pub fn ushorts(
        &self,
        name: &'static str,
        expect: Expect,
    ) -> Result<Option<Arc<[u16]>>, ParamError> {
        self.array(name, expect, DType::UShort, ParamValue::as_ushorts)
    }

    fn array<T>(
        &self,
        name: &'static str,
        expect: Expect,
        want: DType,
        pick: fn(&ParamValue) -> Option<&Arc<[T]>>,
    ) -> Result<Option<Arc<[T]>>, ParamError> {
        let Some(v) = self.get(name) else {
            return Ok(None);
        };
        if v.is_empty() {
            return Ok(None);
        }
        let arr = pick(v).ok_or(ParamError::WrongType {
            name,
            expected: want,
            found: v.dtype(),
        })?;
        if !expect.matches(arr.len()) {
            return Err(ParamError::WrongSize {
                name,
                expected: expect,
                found: arr.len(),
            });
        }
        Ok(Some(Arc::clone(arr)))
    }
}

fn single<T: Copy>(name: &'static str, arr: &[T]) -> Result<T, ParamError> {
    match arr {
        [v] => Ok(*v),
        _ => Err(ParamError::WrongSize {
            name,
            expected: Expect::Exactly(1),
            found: arr.len(),
        }),
    }
}

/// Log each problem and forward it to `sink`, tagged with `frame`.
pub fn report<'a>(
    sink: &dyn ErrorSink,
    frame: u32,
    context: &str,
    errors: impl IntoIterator<Item = &'a ParamError>,
) {
    for err in errors {
        warn!(context, frame, param = err.name(), "{err}");
        sink.report(frame, &format!("{context}: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_sink::ErrorLog;
    use crate::param::ParamBuffer;

    fn source() -> ParamBuffer {
        ParamBuffer::new()
            .with("nacts", 4)
            .with("gain", vec![1.0f32, 2.0, 3.0, 4.0])
            .with("limits", vec![1u16, 2])
            .with("empty", Vec::<f32>::new())
            .with("pair", vec![3, 4])
    }

    #[test]
    fn fetch_reports_all_missing_required() {
        let err = ParamSet::fetch(&source(), &["nacts", "a", "b"], &["c"]).unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.mentions("a"));
        assert!(err.mentions("b"));
        assert!(!err.mentions("c"));
        assert!(err.to_string().starts_with("2 parameter error(s): missing parameter a"));
    }

    #[test]
    fn optional_absent_is_not_an_error() {
        let set = ParamSet::fetch(&source(), &["nacts"], &["absent", "gain"]).unwrap();
        assert!(set.contains("gain"));
        assert!(!set.contains("absent"));
        assert_eq!(set.floats("absent", Expect::Any).unwrap(), None);
    }

    #[test]
    fn scalar_checks_type_and_size() {
        let set = ParamSet::fetch(&source(), &["nacts", "gain", "pair"], &[]).unwrap();
        assert_eq!(set.scalar_i32("nacts").unwrap(), 4);
        assert!(matches!(
            set.scalar_f32("nacts"),
            Err(ParamError::WrongType { expected: DType::Float, found: DType::Int, .. })
        ));
        assert!(matches!(
            set.scalar_i32("pair"),
            Err(ParamError::WrongSize { found: 2, .. })
        ));
    }

    #[test]
    fn array_shape_rules() {
        let set = ParamSet::fetch(&source(), &["gain", "limits", "empty"], &[]).unwrap();
        assert_eq!(set.floats("gain", Expect::Exactly(4)).unwrap().unwrap().len(), 4);
        assert!(set.floats("gain", Expect::MultipleOf(2)).unwrap().is_some());
        assert!(matches!(
            set.floats("gain", Expect::MultipleOf(3)),
            Err(ParamError::WrongSize { found: 4, .. })
        ));
        assert!(matches!(
            set.ints("limits", Expect::Any),
            Err(ParamError::WrongType { expected: DType::Int, found: DType::UShort, .. })
        ));
        assert_eq!(set.floats("empty", Expect::Exactly(4)).unwrap(), None);
    }

    #[test]
    fn expect_multiple_of_zero_never_matches() {
        assert!(!Expect::MultipleOf(0).matches(0));
        assert!(!Expect::MultipleOf(2).matches(0));
        assert!(Expect::Any.matches(0));
    }

    #[test]
    fn outcome_from_warnings() {
        assert_eq!(UpdateOutcome::from_warnings(vec![]), UpdateOutcome::Applied);
        let o = UpdateOutcome::from_warnings(vec![ParamError::invalid("x", "bad")]);
        assert!(o.is_degraded());
        assert_eq!(o.warnings()[0].name(), "x");
    }

    #[test]
    fn report_forwards_to_sink() {
        let log = ErrorLog::new();
        let errs = [ParamError::Missing { name: "nacts" }];
        report(&log, 12, "mirror", &errs);
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame, 12);
        assert_eq!(records[0].message.as_str(), "mirror: missing parameter nacts");
    }
}
