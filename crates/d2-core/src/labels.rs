//! Event and state dictionaries
//!
//! Every event a model may post and every state it may enter is registered
//! under a small integer tag before the model runs. A [`LabeledValueSet`]
//! rejects duplicate tags on definition and unknown tags on lookup, so a
//! model can never act on a tag nobody declared.
//!
//! Events are open-ended: the base events below are shared by all
//! transactions and a concrete transaction may mint its own with
//! [`Event::new`], starting at [`Event::FIRST_DERIVED`]. States are closed
//! per-transaction enums (see [`crate::state_model::ModelState`]) and are
//! registered by their tag.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Symbolic event tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Event(u16);

impl Event {
    /// No transition now; the model waits for an external completion
    pub const NOP: Event = Event(0);
    /// Starts a model
    pub const START: Event = Event(1);
    /// Normal termination
    pub const END: Event = Event(2);
    /// Abnormal termination
    pub const FAIL: Event = Event(3);

    /// Begin selecting a server for one direction
    pub const SELECT_SERVER: Event = Event(100);
    /// A server was selected and is current
    pub const SERVER_SELECTED: Event = Event(101);
    /// The current server could not be used
    pub const SERVER_IO_ERROR: Event = Event(102);
    /// The server list is exhausted
    pub const NO_MORE_SERVERS: Event = Event(103);
    /// An asynchronous exchange completed
    pub const IO_COMPLETED: Event = Event(104);
    /// All requested changes were applied
    pub const UPDATE_OK: Event = Event(105);
    /// The transaction cannot succeed
    pub const UPDATE_FAILED: Event = Event(106);

    /// First tag available to concrete transactions
    pub const FIRST_DERIVED: u16 = 1000;

    /// Creates an event from its raw tag
    pub const fn new(value: u16) -> Self {
        Event(value)
    }

    /// Returns the raw tag
    pub const fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dictionary of tag → label
#[derive(Debug, Clone, Default)]
pub struct LabeledValueSet {
    entries: BTreeMap<u16, &'static str>,
}

impl LabeledValueSet {
    /// Label returned for tags that are not defined
    pub const UNDEFINED_LABEL: &'static str = "UNDEFINED";

    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `label`
    ///
    /// Fails if the tag is already registered or the label is empty.
    pub fn define(&mut self, value: u16, label: &'static str) -> Result<()> {
        if label.is_empty() {
            return Err(Error::state_model(format!(
                "label for value {} cannot be empty",
                value
            )));
        }

        if let Some(existing) = self.entries.get(&value) {
            return Err(Error::state_model(format!(
                "value {} is already defined as {}",
                value, existing
            )));
        }

        self.entries.insert(value, label);
        Ok(())
    }

    /// Look up the label of a defined tag
    pub fn get(&self, value: u16) -> Result<&'static str> {
        self.entries
            .get(&value)
            .copied()
            .ok_or_else(|| Error::state_model(format!("value {} is not defined", value)))
    }

    /// Label of `value`, or [`Self::UNDEFINED_LABEL`]
    pub fn label(&self, value: u16) -> &'static str {
        self.entries
            .get(&value)
            .copied()
            .unwrap_or(Self::UNDEFINED_LABEL)
    }

    /// Whether `value` is defined
    pub fn is_defined(&self, value: u16) -> bool {
        self.entries.contains_key(&value)
    }

    /// Fail with the first tag in `required` that is not defined
    pub fn verify_all(&self, required: &[u16]) -> Result<()> {
        match required.iter().find(|value| !self.is_defined(**value)) {
            Some(missing) => Err(Error::state_model(format!(
                "required value {} is not defined",
                missing
            ))),
            None => Ok(()),
        }
    }

    /// Number of defined tags
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is defined
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
