//! Catalogue of selectable models
//!
//! The front-end only offers models listed here; the backend itself accepts
//! any identifier.

/// Model definition with metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDef {
    /// Identifier sent to the backend (e.g., "gpt-4o-mini")
    pub id: &'static str,
    /// Human-readable description
    pub description: &'static str,
}

/// Model selected for a fresh session
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Get all selectable model definitions, default first
pub fn all_models() -> &'static [ModelDef] {
    &[
        ModelDef {
            id: "gpt-4o-mini",
            description: "GPT-4o mini (fast, inexpensive)",
        },
        ModelDef {
            id: "gpt-3.5-turbo",
            description: "GPT-3.5 Turbo (legacy)",
        },
        ModelDef {
            id: "gpt-4-turbo",
            description: "GPT-4 Turbo (most capable, slower)",
        },
    ]
}

/// Look up a catalogue entry by identifier
pub fn find_model(id: &str) -> Option<&'static ModelDef> {
    all_models().iter().find(|m| m.id == id)
}
