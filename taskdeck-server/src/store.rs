//! Revisioned in-memory task list.
//!
//! The [`ListStore`] holds the authoritative list as wire elements plus a
//! revision counter that advances on every successful mutation.
//! Single-element mutations must name the current revision; a stale one is
//! rejected so the client knows to resynchronize. Whole-list reads and
//! replacements are always accepted.

use parking_lot::Mutex;
use taskdeck_proto::wire::WireElement;

/// Errors returned by list mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    /// The caller's revision is not the current one.
    #[error("unsynchronized data")]
    Unsynchronized {
        /// Revision named by the caller, if any.
        known: Option<u64>,
        /// Current list revision.
        current: u64,
    },

    /// No element has this id.
    #[error("element {0} not found")]
    NotFound(String),

    /// An element with this id already exists.
    #[error("element {0} already exists")]
    Duplicate(String),
}

#[derive(Debug, Default)]
struct TaskList {
    elements: Vec<WireElement>,
    revision: u64,
}

impl TaskList {
    fn position(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|e| e.id == id)
    }

    fn check(&self, known: Option<u64>) -> Result<(), ListError> {
        if known == Some(self.revision) {
            Ok(())
        } else {
            Err(ListError::Unsynchronized {
                known,
                current: self.revision,
            })
        }
    }

    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

/// Thread-safe revisioned list.
#[derive(Debug, Default)]
pub struct ListStore {
    inner: Mutex<TaskList>,
}

impl ListStore {
    /// Creates an empty list at revision 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.inner.lock().revision
    }

    /// All elements and the current revision.
    #[must_use]
    pub fn list(&self) -> (Vec<WireElement>, u64) {
        let list = self.inner.lock();
        (list.elements.clone(), list.revision)
    }

    /// Appends `element`.
    ///
    /// # Errors
    ///
    /// [`ListError::Unsynchronized`] for a stale revision,
    /// [`ListError::Duplicate`] if the id is taken.
    pub fn create(
        &self,
        element: WireElement,
        known: Option<u64>,
    ) -> Result<(WireElement, u64), ListError> {
        let mut list = self.inner.lock();
        list.check(known)?;
        if list.position(&element.id).is_some() {
            return Err(ListError::Duplicate(element.id));
        }
        list.elements.push(element.clone());
        let revision = list.bump();
        tracing::debug!(id = %element.id, revision, "element created");
        Ok((element, revision))
    }

    /// Replaces the element with `id` by `element`.
    ///
    /// # Errors
    ///
    /// [`ListError::Unsynchronized`] for a stale revision,
    /// [`ListError::NotFound`] for an unknown id.
    pub fn update(
        &self,
        id: &str,
        element: WireElement,
        known: Option<u64>,
    ) -> Result<(WireElement, u64), ListError> {
        let mut list = self.inner.lock();
        list.check(known)?;
        let position = list
            .position(id)
            .ok_or_else(|| ListError::NotFound(id.to_string()))?;
        list.elements[position] = element.clone();
        let revision = list.bump();
        tracing::debug!(id, revision, "element updated");
        Ok((element, revision))
    }

    /// Removes the element with `id` and returns it.
    ///
    /// # Errors
    ///
    /// [`ListError::Unsynchronized`] for a stale revision,
    /// [`ListError::NotFound`] for an unknown id.
    pub fn delete(&self, id: &str, known: Option<u64>) -> Result<(WireElement, u64), ListError> {
        let mut list = self.inner.lock();
        list.check(known)?;
        let position = list
            .position(id)
            .ok_or_else(|| ListError::NotFound(id.to_string()))?;
        let removed = list.elements.remove(position);
        let revision = list.bump();
        tracing::debug!(id, revision, "element deleted");
        Ok((removed, revision))
    }

    /// Replaces the whole list. Later duplicates of an id are dropped.
    pub fn replace(&self, elements: Vec<WireElement>) -> (Vec<WireElement>, u64) {
        let mut deduped: Vec<WireElement> = Vec::with_capacity(elements.len());
        for element in elements {
            if deduped.iter().any(|e| e.id == element.id) {
                tracing::warn!(id = %element.id, "dropping duplicate id in replacement list");
            } else {
                deduped.push(element);
            }
        }
        let mut list = self.inner.lock();
        list.elements = deduped;
        let revision = list.bump();
        tracing::debug!(count = list.elements.len(), revision, "list replaced");
        (list.elements.clone(), revision)
    }
}
