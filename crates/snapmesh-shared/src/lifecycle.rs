use serde::{Deserialize, Serialize};

/// Local lifecycle of a shared item.
///
/// ```text
/// Placeholder ──> Added ──> MetadataBound ──> Rendering ──> Ready
///      │            │             │              │
///      └────────────┴─────────────┴──────────────┴──> Failed
/// ```
///
/// A placeholder may skip `Added` when the engine mints the identifier and
/// reports metadata in one step (local seeding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PhotoState {
    Placeholder,
    #[default]
    Added,
    MetadataBound,
    Rendering,
    Ready,
    Failed,
}

impl PhotoState {
    pub fn can_transition_to(self, next: PhotoState) -> bool {
        use PhotoState::*;

        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Placeholder, Added)
                | (Placeholder, MetadataBound)
                | (Added, MetadataBound)
                | (MetadataBound, Rendering)
                | (MetadataBound, Ready)
                | (Rendering, Ready)
                | (Placeholder | Added | MetadataBound | Rendering, Failed)
        )
    }

    /// Content is not yet bound to local engine files.
    pub fn is_loading(self) -> bool {
        matches!(self, PhotoState::Placeholder | PhotoState::Added)
    }

    /// Content is waiting for, or going through, the render pipeline.
    pub fn is_rendering(self) -> bool {
        matches!(
            self,
            PhotoState::Placeholder | PhotoState::MetadataBound | PhotoState::Rendering
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PhotoState::Ready | PhotoState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::PhotoState::*;

    #[test]
    fn happy_path_is_allowed() {
        assert!(Placeholder.can_transition_to(Added));
        assert!(Added.can_transition_to(MetadataBound));
        assert!(MetadataBound.can_transition_to(Rendering));
        assert!(Rendering.can_transition_to(Ready));
    }

    #[test]
    fn terminal_states_are_sticky() {
        assert!(!Ready.can_transition_to(Rendering));
        assert!(!Ready.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Added));
        assert!(Ready.can_transition_to(Ready));
    }

    #[test]
    fn no_skipping_metadata() {
        assert!(!Added.can_transition_to(Ready));
        assert!(!Added.can_transition_to(Rendering));
    }

    #[test]
    fn flags_follow_state() {
        assert!(Placeholder.is_loading() && Placeholder.is_rendering());
        assert!(Added.is_loading() && !Added.is_rendering());
        assert!(!Ready.is_loading() && !Ready.is_rendering());
    }
}
