//! Predefined note tokens and their structural predicates.
//!
//! # Responsibility
//! - Recognize predefined tokens inside free-form note text.
//! - Strip tokens that no longer hold for the annotation's geometric class.
//!
//! # Invariants
//! - User text outside predefined tokens is preserved, line breaks and
//!   spacing included; only the blanks around a stripped token are folded.
//! - Revalidation never adds text; it only removes failing tokens.

use crate::model::annotation::AnnotationId;
use crate::model::neuron::Neuron;
use once_cell::sync::Lazy;
use regex::Regex;

/// One pattern per token in [`PredefinedNote::ALL`] order, with its
/// surrounding blanks.
static TOKEN_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    PredefinedNote::ALL
        .iter()
        .map(|note| {
            Regex::new(&format!(r"[ \t]*{}[ \t]*", regex::escape(note.token())))
                .expect("valid token regex")
        })
        .collect()
});

/// Marker tokens the tracing client offers as one-click notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredefinedNote {
    /// Neurite traced to its natural end. Only valid on ends.
    TracedEnd,
    /// Tracing stopped at an ambiguous spot. Only valid on ends.
    ProblemEnd,
    /// Marks a spot where a branch should be traced later.
    Branch,
    Review,
    PointOfInterest,
    Unique1,
    Unique2,
}

impl PredefinedNote {
    pub const ALL: [Self; 7] = [
        Self::TracedEnd,
        Self::ProblemEnd,
        Self::Branch,
        Self::Review,
        Self::PointOfInterest,
        Self::Unique1,
        Self::Unique2,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Self::TracedEnd => "traced end",
            Self::ProblemEnd => "problem end",
            Self::Branch => "branch",
            Self::Review => "review",
            Self::PointOfInterest => "point of interest",
            Self::Unique1 => "unique 1",
            Self::Unique2 => "unique 2",
        }
    }

    /// Whether this token still describes `annotation_id` inside `neuron`.
    pub fn is_valid_for(self, neuron: &Neuron, annotation_id: AnnotationId) -> bool {
        match self {
            Self::TracedEnd | Self::ProblemEnd => neuron.is_end(annotation_id),
            // a point already branching no longer needs a future-branch marker
            Self::Branch => neuron.children_of(annotation_id).len() <= 1,
            Self::Review | Self::PointOfInterest | Self::Unique1 | Self::Unique2 => true,
        }
    }

    /// Every predefined token contained in `text`, in declaration order.
    pub fn find_in(text: &str) -> Vec<Self> {
        Self::ALL
            .into_iter()
            .filter(|note| text.contains(note.token()))
            .collect()
    }
}

/// Stateless note revalidation rules.
pub struct NoteValidator;

impl NoteValidator {
    /// Text `annotation_id`'s note should hold after stripping failing tokens.
    ///
    /// Returns `None` when the note is absent or already valid.
    pub fn stripped_note(neuron: &Neuron, annotation_id: AnnotationId) -> Option<String> {
        let original = neuron.note(annotation_id);
        if original.is_empty() {
            return None;
        }
        let mut text = original.to_string();
        let mut modified = false;
        for note in PredefinedNote::find_in(original) {
            if !note.is_valid_for(neuron, annotation_id) {
                text = strip_token(&text, note);
                modified = true;
            }
        }
        if !modified {
            return None;
        }
        Some(text.trim().to_string())
    }

    /// Strips failing tokens from the note in place.
    ///
    /// Returns whether the note changed. Callers persist and notify.
    pub fn revalidate(neuron: &mut Neuron, annotation_id: AnnotationId) -> bool {
        match Self::stripped_note(neuron, annotation_id) {
            Some(text) => {
                neuron.set_note_text(annotation_id, &text);
                true
            }
            None => false,
        }
    }
}

/// Removes every occurrence of `note`'s token.
///
/// A token between two words leaves one space; at a line edge it leaves none.
fn strip_token(text: &str, note: PredefinedNote) -> String {
    let Some(re) = PredefinedNote::ALL
        .iter()
        .position(|candidate| *candidate == note)
        .and_then(|index| TOKEN_RES.get(index))
    else {
        return text.to_string();
    };
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for found in re.find_iter(text) {
        out.push_str(&text[last..found.start()]);
        let before = text[..found.start()].chars().next_back();
        let after = text[found.end()..].chars().next();
        if matches!((before, after), (Some(b), Some(a)) if b != '\n' && a != '\n') {
            out.push(' ');
        }
        last = found.end();
    }
    out.push_str(&text[last..]);
    out
}
