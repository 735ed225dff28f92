//! Outcome classification for error filtering
//!
//! A classifier decides whether an error reported to a breaker counts as a
//! failure or is ignored. Classifiers must be deterministic and total:
//! anything they cannot recognise is a failure.

use std::any::Any;
use std::marker::PhantomData;
use std::time::Duration;

/// How a reported error is accounted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Counts toward the failure rate
    Failure,
    /// Occupies a window slot but never trips the breaker
    Ignored,
}

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Breaker name
    pub breaker_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// Duration of the failed call
    pub elapsed: Duration,
}

/// Trait for classifying failures - determines if an error should count
///
/// # Examples
///
/// ```rust
/// use breaker_ring::{ErrorClass, FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct TimeoutsOnly;
///
/// impl FailureClassifier for TimeoutsOnly {
///     fn classify(&self, ctx: &FailureContext<'_>) -> ErrorClass {
///         match ctx.error.downcast_ref::<std::io::Error>() {
///             Some(e) if e.kind() != std::io::ErrorKind::TimedOut => ErrorClass::Ignored,
///             _ => ErrorClass::Failure,
///         }
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    fn classify(&self, ctx: &FailureContext<'_>) -> ErrorClass;
}

/// Default classifier that counts every error as a failure
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn classify(&self, _ctx: &FailureContext<'_>) -> ErrorClass {
        ErrorClass::Failure
    }
}

/// Predicate-based classifier using a closure
///
/// The predicate returns `true` when the error counts as a failure.
pub struct PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    predicate: F,
}

impl<F> PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> FailureClassifier for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn classify(&self, ctx: &FailureContext<'_>) -> ErrorClass {
        if (self.predicate)(ctx) {
            ErrorClass::Failure
        } else {
            ErrorClass::Ignored
        }
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_>) -> bool + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}

/// Classifier over one concrete error type
///
/// Errors of any other type cannot be classified and count as failures.
///
/// ```rust
/// use breaker_ring::{ErrorClass, TypedClassifier};
///
/// #[derive(Debug)]
/// enum ApiError {
///     BadRequest,
///     Unavailable,
/// }
///
/// let classifier = TypedClassifier::new(|e: &ApiError| match e {
///     ApiError::BadRequest => ErrorClass::Ignored,
///     ApiError::Unavailable => ErrorClass::Failure,
/// });
/// # let _ = classifier;
/// ```
pub struct TypedClassifier<E, F> {
    classify: F,
    _error: PhantomData<fn(&E)>,
}

impl<E, F> TypedClassifier<E, F>
where
    E: Any,
    F: Fn(&E) -> ErrorClass + Send + Sync,
{
    pub fn new(classify: F) -> Self {
        Self {
            classify,
            _error: PhantomData,
        }
    }
}

impl<E, F> FailureClassifier for TypedClassifier<E, F>
where
    E: Any,
    F: Fn(&E) -> ErrorClass + Send + Sync,
{
    fn classify(&self, ctx: &FailureContext<'_>) -> ErrorClass {
        ctx.error
            .downcast_ref::<E>()
            .map_or(ErrorClass::Failure, |e| (self.classify)(e))
    }
}

impl<E, F> std::fmt::Debug for TypedClassifier<E, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedClassifier")
            .field("error", &std::any::type_name::<E>())
            .finish()
    }
}
