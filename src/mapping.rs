//! Gesture to action table.
//!
//! One slot per `GestureClass`. Empty or whitespace-only actions count as
//! unmapped.

use anyhow::Result;
use std::collections::BTreeMap;

use crate::gesture::GestureClass;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GestureMapping {
    actions: [Option<String>; GestureClass::COUNT],
}

impl GestureMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from gesture-name keys. Unknown names are an error; empty values
    /// leave the gesture unmapped.
    pub fn from_names<K, V, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut mapping = Self::default();
        for (name, action) in entries {
            let gesture: GestureClass = name.as_ref().parse()?;
            mapping.set(gesture, action);
        }
        Ok(mapping)
    }

    /// The action for `gesture`, if one is set.
    pub fn get(&self, gesture: GestureClass) -> Option<&str> {
        self.actions[gesture.index()]
            .as_deref()
            .map(str::trim)
            .filter(|action| !action.is_empty())
    }

    pub fn set(&mut self, gesture: GestureClass, action: impl Into<String>) {
        let action = action.into();
        self.actions[gesture.index()] = if action.trim().is_empty() {
            None
        } else {
            Some(action)
        };
    }

    pub fn clear(&mut self, gesture: GestureClass) {
        self.actions[gesture.index()] = None;
    }

    /// Mapped gestures with their actions, in `GestureClass::ALL` order.
    pub fn iter(&self) -> impl Iterator<Item = (GestureClass, &str)> + '_ {
        GestureClass::ALL
            .into_iter()
            .filter_map(|gesture| self.get(gesture).map(|action| (gesture, action)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Every gesture name with its action (`""` when unmapped).
    pub fn to_names(&self) -> BTreeMap<String, String> {
        GestureClass::ALL
            .into_iter()
            .map(|gesture| {
                (
                    gesture.as_str().to_string(),
                    self.get(gesture).unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}
