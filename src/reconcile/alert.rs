//! Transient alerts ("toasts") raised by the reconcilers

use crate::models::NotificationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Error,
    Info,
    Neutral,
}

impl Tone {
    pub fn for_kind(kind: &NotificationKind) -> Self {
        match kind {
            NotificationKind::Success => Tone::Success,
            NotificationKind::Error => Tone::Error,
            NotificationKind::Info => Tone::Info,
            NotificationKind::Warning | NotificationKind::Other(_) => Tone::Neutral,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tone::Success => "ok",
            Tone::Error => "error",
            Tone::Info => "info",
            Tone::Neutral => "note",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub tone: Tone,
    pub text: String,
}

impl Toast {
    pub fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            tone,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Tone::Error, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_per_kind() {
        assert_eq!(Tone::for_kind(&NotificationKind::Success), Tone::Success);
        assert_eq!(Tone::for_kind(&NotificationKind::Error), Tone::Error);
        assert_eq!(Tone::for_kind(&NotificationKind::Info), Tone::Info);
        assert_eq!(Tone::for_kind(&NotificationKind::Warning), Tone::Neutral);
        assert_eq!(
            Tone::for_kind(&NotificationKind::Other("bid".into())),
            Tone::Neutral
        );
    }
}
