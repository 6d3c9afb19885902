//! Utilities for validating constraints on types.

use serde::Deserialize;
use validator::{Validate, ValidationErrors};

/// A type that cannot be instatiated without validating the value within.
/// That is, if you have a [`Valid<T>`], `T` is guaranteed to be valid.
///
/// Services take their input as `Valid<T>`, so validation is checked by the
/// compiler rather than repeated in every layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Valid<T> {
    value: T,
}

impl<T> Valid<T> {
    /// Constructs a new validated value.
    pub fn new(value: T) -> Result<Valid<T>, ValidationErrors>
    where
        T: Validate,
    {
        value.validate().map(|_| Valid { value })
    }

    /// Returns a reference to the validated value.
    pub fn inner(&self) -> &T {
        &self.value
    }

    /// Returns the validated value.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> AsRef<T> for Valid<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}

impl<'de, T: Deserialize<'de> + Validate> Deserialize<'de> for Valid<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value: T = T::deserialize(deserializer)?;
        Valid::new(value).map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::Valid;
    use crate::feature::item::item_repository::{NewItem, UpdateItem};

    #[test]
    pub fn valid_new_item_deserializes() {
        let data = r#"{ "name": "Widget", "description": "A widget", "price": 9.99 }"#;
        let value = serde_json::from_str::<Valid<NewItem>>(data);
        assert!(value.is_ok());
    }

    #[test]
    pub fn invalid_new_item_fails() {
        let data = r#"{ "name": "W", "price": 9.99 }"#;
        let value = serde_json::from_str::<Valid<NewItem>>(data);
        assert!(value.is_err());
    }

    #[test]
    pub fn empty_update_is_valid() {
        let value = serde_json::from_str::<Valid<UpdateItem>>("{}").unwrap();
        assert_eq!(&UpdateItem::default(), value.inner());
    }
}
