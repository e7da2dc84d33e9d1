//! Tri-state result of a server-side execution

/// Result of an execution that may be cancelled or skipped.
///
/// Neither `Cancelled` nor `NotPerformed` is an error: cancellation unwinds
/// quietly and a configuration fault has already been logged where it was
/// detected.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
    NotPerformed,
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Completed(value) => Outcome::Completed(f(value)),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::NotPerformed => Outcome::NotPerformed,
        }
    }

    pub fn and_then<U, F: FnOnce(T) -> Outcome<U>>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Completed(value) => f(value),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::NotPerformed => Outcome::NotPerformed,
        }
    }
}

impl<T> From<Option<T>> for Outcome<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Outcome::NotPerformed, Outcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_preserves_neutral_variants() {
        assert_eq!(Outcome::Completed(2).map(|v| v * 2), Outcome::Completed(4));
        assert_eq!(Outcome::<i32>::Cancelled.map(|v| v * 2), Outcome::Cancelled);
        assert_eq!(Outcome::<i32>::NotPerformed.map(|v| v * 2), Outcome::NotPerformed);
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Outcome::from(Some(1)), Outcome::Completed(1));
        assert_eq!(Outcome::<i32>::from(None), Outcome::NotPerformed);
        assert!(Outcome::<i32>::Cancelled.completed().is_none());
    }
}
