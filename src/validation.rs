//! Field-level validation errors for JSON request bodies.

use std::{collections::BTreeMap, fmt::Display};

use serde::Serialize;

/// The validation messages for each invalid field in a request body.
///
/// Serializes as a map from field name to the list of messages for that
/// field, e.g. `{"date": ["The date field is required."]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    /// Record `message` against `field`.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_owned())
            .or_default()
            .push(message.into());
    }

    /// Whether no field has been marked invalid.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The messages recorded for `field`, if any.
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Return `Ok(value)` if no errors were recorded, otherwise return the errors.
    pub fn into_result<T>(self, value: T) -> Result<T, Self> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    /// A one line summary: the first message, followed by a count of the rest.
    pub fn summary(&self) -> String {
        let mut messages = self.0.values().flatten();

        let Some(first) = messages.next() else {
            return "The given data was invalid.".to_owned();
        };

        match messages.count() {
            0 => first.clone(),
            1 => format!("{first} (and 1 more error)"),
            remaining => format!("{first} (and {remaining} more errors)"),
        }
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.summary())
    }
}

/// The message for a required field that is missing, `null` or empty.
pub(crate) fn required_message(field: &str) -> String {
    format!("The {field} field is required.")
}

#[cfg(test)]
mod tests {
    use super::ValidationErrors;

    #[test]
    fn empty_errors_are_ok() {
        let errors = ValidationErrors::default();

        assert_eq!(errors.into_result(42), Ok(42));
    }

    #[test]
    fn summary_counts_remaining_messages() {
        let mut errors = ValidationErrors::default();
        errors.add("date", "first");
        assert_eq!(errors.summary(), "first");

        errors.add("items", "second");
        errors.add("total", "third");

        assert_eq!(errors.summary(), "first (and 2 more errors)");
    }

    #[test]
    fn messages_are_grouped_by_field() {
        let mut errors = ValidationErrors::default();
        errors.add("total", "a");
        errors.add("total", "b");

        assert_eq!(
            errors.get("total"),
            Some(["a".to_owned(), "b".to_owned()].as_slice())
        );
        assert_eq!(errors.get("date"), None);
    }
}
