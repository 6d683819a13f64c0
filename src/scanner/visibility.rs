//! Host visibility signal
//!
//! The host (window, page, app lifecycle) publishes whether the preview is on
//! screen. The scanner pauses while hidden and resumes when shown again.

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// What the scanner does in response to a visibility change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityAction {
    Pause,
    Resume,
    Nothing,
}

/// Hidden always pauses; becoming visible resumes only an active scanner
pub fn transition(visibility: Visibility, active: bool) -> VisibilityAction {
    match visibility {
        Visibility::Hidden => VisibilityAction::Pause,
        Visibility::Visible if active => VisibilityAction::Resume,
        Visibility::Visible => VisibilityAction::Nothing,
    }
}

/// Publisher side of the visibility signal
#[derive(Debug, Clone)]
pub struct VisibilitySignal {
    tx: watch::Sender<Visibility>,
}

impl VisibilitySignal {
    pub fn new(initial: Visibility) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn set(&self, visibility: Visibility) {
        self.tx.send_if_modified(|current| {
            if *current == visibility {
                return false;
            }
            *current = visibility;
            true
        });
    }

    pub fn get(&self) -> Visibility {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Visibility> {
        self.tx.subscribe()
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new(Visibility::Visible)
    }
}
